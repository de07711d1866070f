//! In-place partition of elements into multiple classes

/// Partition `items` in place into `num_classes` groups.
///
/// `class_fn(item)` must return the class of each element, an integer in
/// `0..num_classes`. On return, `class_ends[c]` holds the end index of the
/// range occupied by class `c`, so class `c` occupies
/// `class_ends[c-1]..class_ends[c]` (with an implicit 0 start for class 0).
///
/// The number of classes should be small compared to the slice length;
/// with many classes this degenerates toward a bubble sort and a real
/// sort is preferable.
pub fn multi_partition<T, F>(
    items: &mut [T],
    class_fn: F,
    class_ends: &mut [usize],
    num_classes: usize,
) where
    F: Fn(&T) -> usize,
{
    debug_assert!(class_ends.len() >= num_classes);
    for end in class_ends[..num_classes].iter_mut() {
        *end = 0;
    }
    for i in 0..items.len() {
        let c = class_fn(&items[i]);
        debug_assert!(c < num_classes);
        // Bubble the current element down past all higher classes
        for j in (c + 1..num_classes).rev() {
            items.swap(class_ends[j], class_ends[j - 1]);
            class_ends[j] += 1;
        }
        class_ends[c] += 1;
    }
}
