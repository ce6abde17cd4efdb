//! The reservation-backed append-only array.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::{Index, IndexMut};
use std::ptr::{self, NonNull};
use std::slice;

use crate::error::VmError;
use crate::fatal;
use crate::footprint::Footprint;
use crate::vm::{self, Backend, Platform, Region};

/// Largest reservation a pointer offset can address.
const MAX_RESERVATION: usize = isize::MAX.unsigned_abs();

/// An append-only array with a fixed capacity, stored in one virtual
/// address-space reservation.
///
/// The whole `capacity * size_of::<T>()` range is reserved up front but
/// only pages that elements are written to ever consume physical memory.
/// Elements never move: [`push`](Self::push) takes `&self`, so references
/// returned by earlier pushes stay valid across later ones. They are
/// invalidated only by [`reset`](Self::reset) or drop, both of which need
/// `&mut self`.
///
/// Appending past `capacity` and indexing past `len` are fatal (see
/// [`fatal`](crate::fatal)); the `try_*` methods report the same
/// conditions as [`VmError`].
///
/// # Teardown
///
/// [`reset`](Self::reset) drops every live element, one at a time, before
/// discarding the pages. Drop does the same before releasing the
/// reservation.
///
/// Not internally synchronized: the array is `Send` for `T: Send` but never
/// `Sync`.
pub struct VirtualArray<T> {
    base: NonNull<T>,
    capacity: usize,
    len: Cell<usize>,
    _owns: PhantomData<T>,
}

// SAFETY: the array exclusively owns its reservation and the `T`s in it.
unsafe impl<T: Send> Send for VirtualArray<T> {}

impl<T> VirtualArray<T> {
    /// Reserve address space for `capacity` elements.
    ///
    /// A zero capacity (or a zero-sized `T`) reserves nothing.
    ///
    /// Fatal if the OS refuses the reservation.
    #[must_use]
    #[track_caller]
    pub fn with_capacity(capacity: usize) -> Self {
        fatal::check(Self::try_with_capacity(capacity))
    }

    /// Fallible [`with_capacity`](Self::with_capacity).
    pub fn try_with_capacity(capacity: usize) -> Result<Self, VmError> {
        let bytes = Self::reservation_bytes(capacity)?;
        let base = if bytes == 0 {
            NonNull::dangling()
        } else {
            Self::reserve(capacity, bytes)?
        };
        Ok(Self {
            base,
            capacity,
            len: Cell::new(0),
            _owns: PhantomData,
        })
    }

    fn reserve(capacity: usize, bytes: usize) -> Result<NonNull<T>, VmError> {
        let page_size = vm::page_size();
        let align = mem::align_of::<T>();
        if align > page_size {
            return Err(VmError::Alignment { align, page_size });
        }

        let base = Platform::reserve(bytes).map_err(|source| VmError::Reserve { bytes, source })?;
        tracing::debug!(
            capacity,
            bytes,
            base = ?base.as_ptr(),
            strategy = %vm::strategy(),
            "reserved address space"
        );
        Ok(base.cast())
    }

    fn reservation_bytes(capacity: usize) -> Result<usize, VmError> {
        let elem_size = mem::size_of::<T>();
        capacity
            .checked_mul(elem_size)
            .filter(|&bytes| bytes <= MAX_RESERVATION)
            .ok_or(VmError::LayoutOverflow {
                capacity,
                elem_size,
            })
    }

    /// Maximum number of elements, fixed at construction.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.get()
    }

    /// Whether no elements are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether another append would exhaust the capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Appends left before the capacity is exhausted.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.len()
    }

    /// Size of the address-space reservation in bytes.
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.capacity * mem::size_of::<T>()
    }

    /// Base of the reservation. Dangling when nothing is reserved.
    #[must_use]
    pub fn as_ptr(&self) -> *const T {
        self.base.as_ptr()
    }

    fn is_reserved(&self) -> bool {
        self.reserved_bytes() != 0
    }

    fn owned_region(&self) -> Region {
        Region::new(self.base.as_ptr().cast::<u8>(), self.reserved_bytes())
    }

    /// Append `value`, returning a reference to it in place.
    ///
    /// Fatal when the array is full.
    #[track_caller]
    pub fn push(&self, value: T) -> &T {
        fatal::check(self.try_push(value))
    }

    /// Append the value produced by `make`.
    ///
    /// `make` runs before the slot is touched, so only the final store
    /// executes against uncommitted memory. Fatal when the array is full.
    #[track_caller]
    pub fn push_with<F>(&self, make: F) -> &T
    where
        F: FnOnce() -> T,
    {
        fatal::check(self.try_push_with(make))
    }

    /// Fallible [`push`](Self::push). The value is dropped on failure.
    pub fn try_push(&self, value: T) -> Result<&T, VmError> {
        self.try_push_with(|| value)
    }

    /// Fallible [`push_with`](Self::push_with). `make` is not called when
    /// the array is already full.
    pub fn try_push_with<F>(&self, make: F) -> Result<&T, VmError>
    where
        F: FnOnce() -> T,
    {
        if self.is_full() {
            return Err(VmError::CapacityExhausted {
                capacity: self.capacity,
            });
        }
        let value = make();

        // `make` may itself have pushed through this shared borrow.
        let index = self.len.get();
        if index == self.capacity {
            return Err(VmError::CapacityExhausted {
                capacity: self.capacity,
            });
        }

        // SAFETY: `index < capacity`, so the slot lies inside the reservation
        // (or is a zero-sized offset from a dangling base).
        let slot = unsafe { self.base.as_ptr().add(index) };
        tracing::trace!(index, "constructing element");
        let slot_region = Region::new(slot.cast::<u8>(), mem::size_of::<T>());
        // SAFETY: the slot is unoccupied and owned by this array; the backend
        // commits it on first touch.
        unsafe {
            Platform::construct(self.owned_region(), slot_region, || slot.write(value));
        }
        self.len.set(index + 1);

        // SAFETY: just initialized; only `&mut self` methods move or drop it.
        Ok(unsafe { &*slot })
    }

    /// Reference to the element at `index`, if it is live.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        if index < self.len() {
            // SAFETY: slots below `len` hold initialized values.
            Some(unsafe { &*self.base.as_ptr().add(index) })
        } else {
            None
        }
    }

    /// Mutable reference to the element at `index`, if it is live.
    #[must_use]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index < self.len() {
            // SAFETY: slots below `len` hold initialized values; `&mut self`
            // excludes every other reference into the array.
            Some(unsafe { &mut *self.base.as_ptr().add(index) })
        } else {
            None
        }
    }

    /// The live elements as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: `[0, len)` is initialized and contiguous.
        unsafe { slice::from_raw_parts(self.base.as_ptr(), self.len()) }
    }

    /// The live elements as a mutable slice.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: as `as_slice`, with exclusive access.
        unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.len()) }
    }

    /// Iterate over the live elements.
    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    /// Iterate mutably over the live elements.
    pub fn iter_mut(&mut self) -> slice::IterMut<'_, T> {
        self.as_mut_slice().iter_mut()
    }

    /// Drop every element and discard the physical pages, keeping the
    /// reservation at the same base for reuse.
    ///
    /// Fatal if the OS refuses the discard.
    #[track_caller]
    pub fn reset(&mut self) {
        fatal::check(self.try_reset());
    }

    /// Fallible [`reset`](Self::reset).
    ///
    /// The array is empty afterwards even when the discard fails.
    pub fn try_reset(&mut self) -> Result<(), VmError> {
        self.drop_elements();
        if !self.is_reserved() {
            return Ok(());
        }
        let bytes = self.reserved_bytes();
        // SAFETY: `base..base+bytes` is our live reservation with no live
        // elements left in it.
        unsafe { Platform::discard(self.base.cast(), bytes) }
            .map_err(|source| VmError::Discard { bytes, source })?;
        tracing::debug!(bytes, base = ?self.base.as_ptr(), "discarded physical pages");
        Ok(())
    }

    fn drop_elements(&mut self) {
        // Zero `len` first so a panicking destructor leaks instead of
        // dropping twice.
        let len = self.len.replace(0);
        if mem::needs_drop::<T>() {
            // SAFETY: `[0, len)` was initialized and is no longer reachable.
            unsafe {
                ptr::drop_in_place(ptr::slice_from_raw_parts_mut(self.base.as_ptr(), len));
            }
        }
    }

    /// Current reserved vs. resident memory of this array.
    pub fn footprint(&self) -> Result<Footprint, VmError> {
        let reserved_bytes = self.reserved_bytes();
        let resident_bytes = if self.is_reserved() {
            // SAFETY: querying our own live reservation.
            unsafe { Platform::resident_bytes(self.base.cast(), reserved_bytes) }
                .map_err(|source| VmError::Query { source })?
        } else {
            0
        };
        Ok(Footprint {
            page_size: vm::page_size(),
            reserved_bytes,
            resident_bytes,
            live_bytes: self.len() * mem::size_of::<T>(),
        })
    }
}

impl<T> Drop for VirtualArray<T> {
    fn drop(&mut self) {
        self.drop_elements();
        if !self.is_reserved() {
            return;
        }
        let bytes = self.reserved_bytes();
        // SAFETY: the reservation is ours and nothing refers into it anymore.
        if let Err(source) = unsafe { Platform::release(self.base.cast(), bytes) } {
            fatal::raise(VmError::Release { bytes, source });
        }
        tracing::debug!(bytes, "released reservation");
    }
}

impl<T> Default for VirtualArray<T> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl<T> Index<usize> for VirtualArray<T> {
    type Output = T;

    #[track_caller]
    fn index(&self, index: usize) -> &T {
        match self.get(index) {
            Some(value) => value,
            None => fatal::raise(VmError::IndexOutOfRange {
                index,
                len: self.len(),
            }),
        }
    }
}

impl<T> IndexMut<usize> for VirtualArray<T> {
    #[track_caller]
    fn index_mut(&mut self, index: usize) -> &mut T {
        let len = self.len();
        match self.get_mut(index) {
            Some(value) => value,
            None => fatal::raise(VmError::IndexOutOfRange { index, len }),
        }
    }
}

impl<'a, T> IntoIterator for &'a VirtualArray<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T> IntoIterator for &'a mut VirtualArray<T> {
    type Item = &'a mut T;
    type IntoIter = slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

impl<T: fmt::Debug> fmt::Debug for VirtualArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn new_array_is_empty() {
        let array = VirtualArray::<u64>::with_capacity(16);
        assert_eq!(array.len(), 0);
        assert_eq!(array.capacity(), 16);
        assert!(array.is_empty());
        assert!(!array.is_full());
        assert_eq!(array.remaining(), 16);
        assert_eq!(array.reserved_bytes(), 128);
    }

    #[test]
    fn zero_capacity_reserves_nothing() {
        let array = VirtualArray::<u64>::with_capacity(0);
        assert_eq!(array.capacity(), 0);
        assert_eq!(array.reserved_bytes(), 0);
        assert!(array.is_full());
        assert_eq!(array.as_ptr(), NonNull::<u64>::dangling().as_ptr().cast_const());
        let fp = array.footprint().unwrap();
        assert_eq!(fp.reserved_bytes, 0);
        assert_eq!(fp.resident_bytes, 0);
    }

    #[test]
    fn zero_capacity_rejects_push() {
        let array = VirtualArray::<u64>::default();
        assert!(matches!(
            array.try_push(1),
            Err(VmError::CapacityExhausted { capacity: 0 })
        ));
    }

    #[test]
    #[should_panic(expected = "capacity exhausted")]
    fn zero_capacity_push_is_fatal() {
        let array = VirtualArray::<u64>::with_capacity(0);
        array.push(1);
    }

    #[test]
    fn push_returns_value_in_place() {
        let array = VirtualArray::with_capacity(4);
        let first = array.push(10u32);
        assert_eq!(*first, 10);
        assert_eq!(ptr::from_ref(first), array.as_ptr());
        assert_eq!(array.len(), 1);
    }

    #[test]
    fn earlier_references_survive_pushes() {
        let array = VirtualArray::with_capacity(64);
        let first = array.push(String::from("first"));
        let refs: Vec<&String> = (0..63).map(|i| array.push(i.to_string())).collect();
        assert_eq!(first, "first");
        assert_eq!(refs[0], "0");
        assert_eq!(refs[62], "62");
        assert!(array.is_full());
    }

    #[test]
    fn push_with_runs_constructor_once() {
        let array = VirtualArray::with_capacity(2);
        let mut calls = 0;
        array.push_with(|| {
            calls += 1;
            [7u8; 100]
        });
        assert_eq!(calls, 1);
        assert_eq!(array[0], [7u8; 100]);
    }

    #[test]
    fn try_push_with_skips_constructor_when_full() {
        let array = VirtualArray::with_capacity(1);
        array.push(1u8);
        let mut called = false;
        let result = array.try_push_with(|| {
            called = true;
            2
        });
        assert!(result.is_err());
        assert!(!called);
    }

    #[test]
    fn nested_push_inside_constructor() {
        let array = VirtualArray::with_capacity(2);
        let outer = array.push_with(|| *array.push(1u16) + 1);
        assert_eq!(*outer, 2);
        assert_eq!(array.as_slice(), &[1, 2]);
    }

    #[test]
    fn nested_push_that_fills_array_is_rejected() {
        let array = VirtualArray::with_capacity(1);
        let result = array.try_push_with(|| *array.push(1u16) + 1);
        assert!(matches!(
            result,
            Err(VmError::CapacityExhausted { capacity: 1 })
        ));
        assert_eq!(array.as_slice(), &[1]);
    }

    #[test]
    fn get_checks_live_range() {
        let array = VirtualArray::with_capacity(8);
        array.push(5i64);
        assert_eq!(array.get(0), Some(&5));
        assert_eq!(array.get(1), None);
        assert_eq!(array.get(100), None);
    }

    #[test]
    #[should_panic(expected = "index 1 out of live range (len 1)")]
    fn index_past_len_is_fatal() {
        let array = VirtualArray::with_capacity(8);
        array.push(5i64);
        let _value = array[1];
    }

    #[test]
    #[should_panic(expected = "out of live range")]
    fn index_mut_past_len_is_fatal() {
        let mut array = VirtualArray::<i64>::with_capacity(8);
        array[0] = 1;
    }

    #[test]
    fn index_mut_updates_in_place() {
        let mut array = VirtualArray::with_capacity(3);
        array.push(1);
        array.push(2);
        array[1] += 40;
        assert_eq!(array[1], 42);
        for value in &mut array {
            *value *= 2;
        }
        assert_eq!(array.as_slice(), &[2, 84]);
    }

    #[test]
    fn reset_keeps_base_and_capacity() {
        let mut array = VirtualArray::with_capacity(10);
        let base = array.as_ptr();
        for i in 0..10u64 {
            array.push(i);
        }
        array.reset();
        assert!(array.is_empty());
        assert_eq!(array.capacity(), 10);
        assert_eq!(array.as_ptr(), base);
        array.push(99);
        assert_eq!(array[0], 99);
        assert_eq!(ptr::from_ref(&array[0]), base);
    }

    #[test]
    fn reset_drops_live_elements() {
        let dropped = Rc::new(RefCell::new(Vec::new()));
        struct Tracked(u8, Rc<RefCell<Vec<u8>>>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.1.borrow_mut().push(self.0);
            }
        }

        let mut array = VirtualArray::with_capacity(4);
        array.push(Tracked(1, Rc::clone(&dropped)));
        array.push(Tracked(2, Rc::clone(&dropped)));
        array.reset();
        assert_eq!(*dropped.borrow(), vec![1, 2]);

        array.push(Tracked(3, Rc::clone(&dropped)));
        drop(array);
        assert_eq!(*dropped.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn failed_push_drops_value() {
        let counter = Rc::new(());
        let array = VirtualArray::with_capacity(1);
        array.push(Rc::clone(&counter));
        assert!(array.try_push(Rc::clone(&counter)).is_err());
        assert_eq!(Rc::strong_count(&counter), 2);
        drop(array);
        assert_eq!(Rc::strong_count(&counter), 1);
    }

    #[test]
    fn zero_sized_elements() {
        let mut array = VirtualArray::<()>::with_capacity(1_000);
        assert_eq!(array.reserved_bytes(), 0);
        for _ in 0..1_000 {
            array.push(());
        }
        assert!(array.is_full());
        assert_eq!(array.iter().count(), 1_000);
        array.reset();
        assert!(array.is_empty());
    }

    #[test]
    fn layout_overflow_is_reported() {
        let result = VirtualArray::<u64>::try_with_capacity(usize::MAX / 4);
        assert!(matches!(
            result,
            Err(VmError::LayoutOverflow { elem_size: 8, .. })
        ));
    }

    #[test]
    fn over_aligned_elements_are_rejected() {
        #[repr(align(65536))]
        struct Huge(u8);

        let page_size = vm::page_size();
        let result = VirtualArray::<Huge>::try_with_capacity(1);
        if page_size < 65536 {
            assert!(matches!(result, Err(VmError::Alignment { align: 65536, .. })));
        } else {
            let array = result.unwrap();
            assert_eq!(array.push(Huge(3)).0, 3);
        }
    }

    #[test]
    fn debug_lists_elements() {
        let array = VirtualArray::with_capacity(3);
        array.push("a");
        array.push("b");
        assert_eq!(format!("{array:?}"), r#"["a", "b"]"#);
    }

    #[test]
    fn footprint_tracks_live_bytes() {
        let array = VirtualArray::with_capacity(1_000);
        for i in 0..3u32 {
            array.push(i);
        }
        let fp = array.footprint().unwrap();
        assert_eq!(fp.reserved_bytes, 4_000);
        assert_eq!(fp.live_bytes, 12);
        assert!(fp.resident_bytes >= fp.page_size);
    }

    #[test]
    fn array_is_send() {
        fn assert_send<S: Send>() {}
        assert_send::<VirtualArray<String>>();
    }
}
