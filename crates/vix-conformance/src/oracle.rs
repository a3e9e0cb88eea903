#![forbid(unsafe_code)]

//! Host-side ground truth for the insert family.
//!
//! The oracle owns no randomness of its own: callers pass the generator (or a
//! plain closure) so the draw order stays auditable. Lanes are drawn row-major,
//! element outer and lane inner, one draw per lane.

use vix_dtype::Lane;
use vix_random::SeededSource;

/// One type-appropriate draw from `source`.
pub fn genrand<T: Lane>(source: &mut impl SeededSource) -> T {
    T::from_draw(source.next_u64())
}

#[must_use]
pub fn generate_inputs<T: Lane>(source: &mut impl SeededSource, num: usize) -> Vec<T> {
    (0..num).map(|_| genrand(&mut *source)).collect()
}

/// `num` vector records of `width` lanes, stored flat and row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSet<T> {
    width: usize,
    lanes: Vec<T>,
}

impl<T: Lane> ReferenceSet<T> {
    /// Wraps flat lane storage; `None` unless it divides into whole records.
    #[must_use]
    pub fn from_lanes(width: usize, lanes: Vec<T>) -> Option<Self> {
        (width > 0 && lanes.len() % width == 0).then_some(Self { width, lanes })
    }

    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Number of records; zero when the width is zero.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.len().checked_div(self.width).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    #[must_use]
    pub fn lanes(&self) -> &[T] {
        &self.lanes
    }

    #[must_use]
    pub fn record(&self, element: usize) -> &[T] {
        &self.lanes[element * self.width..(element + 1) * self.width]
    }

    #[must_use]
    pub fn lane(&self, element: usize, lane: usize) -> T {
        self.lanes[element * self.width + lane]
    }

    #[must_use]
    pub fn to_records(&self) -> Vec<Vec<T>> {
        if self.width == 0 {
            return Vec::new();
        }
        self.lanes
            .chunks_exact(self.width)
            .map(<[T]>::to_vec)
            .collect()
    }
}

/// `record[i].lane[j] = inputs[i] + draw()`, drawing in row-major order.
pub fn build_reference<T: Lane>(
    inputs: &[T],
    width: usize,
    mut draw: impl FnMut() -> T,
) -> ReferenceSet<T> {
    let mut lanes = Vec::with_capacity(inputs.len() * width);
    for &input in inputs {
        for _ in 0..width {
            lanes.push(input.offset(draw()));
        }
    }
    ReferenceSet { width, lanes }
}

pub fn build_reference_seeded<T: Lane>(
    inputs: &[T],
    width: usize,
    source: &mut impl SeededSource,
) -> ReferenceSet<T> {
    build_reference(inputs, width, || genrand(&mut *source))
}

/// Lane `j` of element `i` after inserting `inputs[i]` at `lane_index`.
#[must_use]
pub fn expected_lane<T: Lane>(
    reference: &ReferenceSet<T>,
    inputs: &[T],
    element: usize,
    lane: usize,
    lane_index: usize,
) -> T {
    if lane == lane_index {
        inputs[element]
    } else {
        reference.lane(element, lane)
    }
}

/// The reference with lane `lane_index` of every record replaced by its input.
#[must_use]
pub fn expected_for_lane<T: Lane>(
    reference: &ReferenceSet<T>,
    inputs: &[T],
    lane_index: usize,
) -> ReferenceSet<T> {
    let mut expected = reference.clone();
    for (record, &input) in expected.lanes.chunks_exact_mut(reference.width).zip(inputs) {
        record[lane_index] = input;
    }
    expected
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneMismatch<T> {
    pub element: usize,
    pub lane: usize,
    pub expected: T,
    pub observed: T,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison<T> {
    /// Elements inspected, including the failing one.
    pub elements_checked: usize,
    pub mismatch: Option<LaneMismatch<T>>,
}

/// Scans `observed` element by element and stops at the first lane whose bits
/// differ from the expectation for `lane_index`.
pub fn first_mismatch<T: Lane>(
    reference: &ReferenceSet<T>,
    inputs: &[T],
    lane_index: usize,
    observed: &[T],
) -> Comparison<T> {
    let width = reference.width;
    let mut elements_checked = 0;
    if width == 0 {
        return Comparison {
            elements_checked,
            mismatch: None,
        };
    }
    for (element, record) in observed.chunks_exact(width).enumerate() {
        elements_checked += 1;
        for (lane, &got) in record.iter().enumerate() {
            let expected = expected_lane(reference, inputs, element, lane, lane_index);
            if !got.exact_eq(expected) {
                return Comparison {
                    elements_checked,
                    mismatch: Some(LaneMismatch {
                        element,
                        lane,
                        expected,
                        observed: got,
                    }),
                };
            }
        }
    }
    Comparison {
        elements_checked,
        mismatch: None,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ReferenceSet, build_reference, build_reference_seeded, expected_for_lane, first_mismatch,
        generate_inputs,
    };
    use vix_random::{DeterministicRng, SeededSource};

    struct Counter(u64);

    impl SeededSource for Counter {
        fn next_u64(&mut self) -> u64 {
            self.0 += 1;
            self.0
        }
    }

    #[test]
    fn reference_draws_run_row_major() {
        let inputs = [100i32, 200];
        let reference = build_reference_seeded(&inputs, 2, &mut Counter(0));
        assert_eq!(reference.to_records(), vec![vec![101, 102], vec![203, 204]]);
        assert_eq!(reference.len(), 2);
        assert_eq!(reference.lane(1, 0), 203);
    }

    #[test]
    fn expected_set_differs_from_reference_only_at_the_lane() {
        let mut rng = DeterministicRng::new(7);
        let inputs: Vec<i64> = generate_inputs(&mut rng, 32);
        let reference = build_reference_seeded(&inputs, 4, &mut rng);
        for lane_index in 0..4 {
            let expected = expected_for_lane(&reference, &inputs, lane_index);
            for element in 0..inputs.len() {
                for lane in 0..4 {
                    if lane == lane_index {
                        assert_eq!(expected.lane(element, lane), inputs[element]);
                    } else {
                        assert_eq!(expected.lane(element, lane), reference.lane(element, lane));
                    }
                }
            }
        }
    }

    #[test]
    fn comparison_stops_at_first_failing_element() {
        let inputs = [1i8, 2, 3];
        let reference = build_reference(&inputs, 2, || 5);
        let mut observed = expected_for_lane(&reference, &inputs, 1).lanes().to_vec();
        observed[2] = 0;
        observed[4] = 0;

        let comparison = first_mismatch(&reference, &inputs, 1, &observed);
        let mismatch = comparison.mismatch.expect("element 1 lane 0 differs");
        assert_eq!((mismatch.element, mismatch.lane), (1, 0));
        assert_eq!((mismatch.expected, mismatch.observed), (7, 0));
        assert_eq!(comparison.elements_checked, 2);
    }

    #[test]
    fn matching_observations_check_every_element() {
        let inputs = [0.5f32, -0.25];
        let reference = build_reference(&inputs, 4, || 1.0);
        let observed = expected_for_lane(&reference, &inputs, 3);
        let comparison = first_mismatch(&reference, &inputs, 3, observed.lanes());
        assert_eq!(comparison.mismatch, None);
        assert_eq!(comparison.elements_checked, 2);
    }

    #[test]
    fn negative_zero_is_not_positive_zero() {
        let inputs = [-0.0f64];
        let reference = build_reference(&inputs, 2, || 1.0);
        let comparison = first_mismatch(&reference, &inputs, 0, &[0.0, 1.0]);
        assert!(comparison.mismatch.is_some());
    }

    #[test]
    fn zero_width_reference_is_empty_not_a_panic() {
        let inputs = [1i32, 2];
        let reference = build_reference(&inputs, 0, || 1);
        assert_eq!(reference.len(), 0);
        assert!(reference.is_empty());
        assert!(reference.to_records().is_empty());
        let comparison = first_mismatch(&reference, &inputs, 0, &[]);
        assert_eq!(comparison.elements_checked, 0);
    }

    #[test]
    fn from_lanes_rejects_ragged_storage() {
        assert!(ReferenceSet::from_lanes(4, vec![0i32; 6]).is_none());
        assert!(ReferenceSet::from_lanes(0, Vec::<i32>::new()).is_none());
        let set = ReferenceSet::from_lanes(2, vec![1i32, 2, 3, 4]).expect("two records");
        assert_eq!(set.record(1), &[3, 4]);
        assert!(!set.is_empty());
    }
}
