//! Fixed-size batching for lazily produced documents.
//!
//! [`batched`] groups any iterator into `Vec`s of `size` items, the last one
//! holding the remainder. It pulls from the underlying iterator only when
//! the consumer asks for the next batch, so memory stays bounded at one
//! batch, and it never yields an empty batch: an exhausted input produces
//! nothing. Every entity kind's emission loop goes through this one adapter.

/// Group `iter` into batches of `size` (`size` must be >= 1).
pub fn batched<I>(iter: I, size: usize) -> Batched<I::IntoIter>
where
    I: IntoIterator,
{
    debug_assert!(size >= 1, "batch size must be >= 1");
    Batched {
        inner: iter.into_iter(),
        size,
    }
}

pub struct Batched<I> {
    inner: I,
    size: usize,
}

impl<I: Iterator> Iterator for Batched<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut batch = Vec::with_capacity(self.size);
        for item in self.inner.by_ref() {
            batch.push(item);
            if batch.len() == self.size {
                return Some(batch);
            }
        }
        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}
