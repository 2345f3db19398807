//! Read-only strided views over packed byte buffers.

use std::marker::PhantomData;
use std::mem::size_of;

use bytemuck::Pod;

/// A typed view of `len` elements spaced `stride` bytes apart.
///
/// A zero stride repeats the first element, which is how optional inputs
/// default to a constant value.
#[derive(Clone, Copy)]
pub struct StridedView<'a, T: Pod> {
    bytes: &'a [u8],
    stride: usize,
    len: usize,
    _marker: PhantomData<T>,
}

impl<'a, T: Pod> StridedView<'a, T> {
    /// Creates a view; `bytes` must cover `(len - 1) * stride + size_of::<T>()` bytes.
    pub fn new(bytes: &'a [u8], stride: usize, len: usize) -> Self {
        debug_assert!(len == 0 || bytes.len() >= (len - 1) * stride + size_of::<T>());
        Self {
            bytes,
            stride,
            len,
            _marker: PhantomData,
        }
    }

    /// Tightly packed view over a typed slice.
    pub fn from_slice(values: &'a [T]) -> Self {
        Self::new(bytemuck::cast_slice(values), size_of::<T>(), values.len())
    }

    pub fn empty() -> Self {
        Self::new(&[], 0, 0)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.len {
            return None;
        }
        let start = index * self.stride;
        self.bytes
            .get(start..start + size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }
}

impl<T: Pod + std::fmt::Debug> std::fmt::Debug for StridedView<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StridedView")
            .field("stride", &self.stride)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_interleaved_fields() {
        let raw: [f32; 6] = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let bytes = bytemuck::cast_slice(&raw);
        let view: StridedView<'_, f32> = StridedView::new(&bytes[4..], 8, 3);
        let values: Vec<f32> = view.iter().collect();
        assert_eq!(values, vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn zero_stride_repeats() {
        let value = [7u32];
        let view: StridedView<'_, u32> = StridedView::new(bytemuck::cast_slice(&value), 0, 4);
        assert_eq!(view.iter().collect::<Vec<_>>(), vec![7, 7, 7, 7]);
        assert!(StridedView::<u32>::empty().is_empty());
    }
}
