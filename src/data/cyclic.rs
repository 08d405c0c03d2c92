// --- File: src/data/cyclic.rs ---

//! Endless iteration over a finite loader.

use super::dataset::{DataError, DataResult};

/// Restarts its loader whenever a pass runs out.
///
/// Useful when two loaders of different lengths are consumed in lockstep:
/// the shorter one is wrapped and simply starts over.
pub struct CyclicIterator<L>
where
    L: IntoIterator + Clone,
{
    loader: L,
    iterator: L::IntoIter,
    passes: usize,
}

impl<L> CyclicIterator<L>
where
    L: IntoIterator + Clone,
{
    pub fn new(loader: L) -> Self {
        let iterator = loader.clone().into_iter();
        Self {
            loader,
            iterator,
            passes: 1,
        }
    }

    /// Next item, restarting the loader when the current pass is exhausted.
    ///
    /// # Errors
    ///
    /// [`DataError::EmptyLoader`] when a fresh pass yields nothing either.
    pub fn get(&mut self) -> DataResult<L::Item> {
        if let Some(item) = self.iterator.next() {
            return Ok(item);
        }
        self.restart();
        self.iterator.next().ok_or(DataError::EmptyLoader)
    }

    /// Number of passes started, counting the current one.
    pub fn passes(&self) -> usize {
        self.passes
    }

    fn restart(&mut self) {
        self.iterator = self.loader.clone().into_iter();
        self.passes += 1;
        tracing::debug!(pass = self.passes, "loader exhausted, restarting");
    }
}

impl<L> Iterator for CyclicIterator<L>
where
    L: IntoIterator + Clone,
{
    type Item = L::Item;

    /// Never ends unless the loader is empty.
    fn next(&mut self) -> Option<Self::Item> {
        self.get().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraps_around() {
        let mut cyclic = CyclicIterator::new(vec![1, 2, 3]);
        let drawn: Vec<_> = (0..4).map(|_| cyclic.get().unwrap()).collect();
        assert_eq!(drawn, vec![1, 2, 3, 1]);
        assert_eq!(cyclic.passes(), 2);
    }

    #[test]
    fn test_empty_loader_errors() {
        let mut cyclic = CyclicIterator::new(Vec::<u8>::new());
        assert!(matches!(cyclic.get(), Err(DataError::EmptyLoader)));
        assert!(cyclic.next().is_none());
    }

    #[test]
    fn test_iterator_never_ends() {
        let cyclic = CyclicIterator::new(0..2);
        assert_eq!(cyclic.take(5).collect::<Vec<_>>(), vec![0, 1, 0, 1, 0]);
    }
}
