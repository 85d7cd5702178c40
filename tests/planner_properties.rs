//! Property-based tests for part planning

use object_copier::models::copy::{ObjectLocation, UploadSession};
use object_copier::services::copy::planner::{MAX_PARTS, MIN_COPY_SIZE, MIN_PART_SIZE, PartPlan};
use proptest::prelude::*;
use std::sync::Arc;

const TIB: u64 = 1024 * 1024 * 1024 * 1024;

proptest! {
    #[test]
    fn props_ranges_tile_the_source_exactly(
        source_size in MIN_COPY_SIZE..6 * TIB,
        min_part_size in MIN_PART_SIZE..(5 * 1024 * MIN_PART_SIZE),
    ) {
        let plan = PartPlan::new(source_size, min_part_size).unwrap();
        let ranges = plan.ranges();

        prop_assert!(!ranges.is_empty());
        prop_assert_eq!(ranges[0].first, 0);
        prop_assert_eq!(ranges[ranges.len() - 1].last, source_size - 1);
        for pair in ranges.windows(2) {
            prop_assert_eq!(pair[0].last + 1, pair[1].first);
        }

        let total: u64 = ranges.iter().map(|r| r.byte_count()).sum();
        prop_assert_eq!(total, source_size);
    }

    #[test]
    fn props_part_count_and_sizes_stay_in_bounds(
        source_size in MIN_COPY_SIZE..6 * TIB,
        min_part_size in MIN_PART_SIZE..(64 * MIN_PART_SIZE),
    ) {
        let plan = PartPlan::new(source_size, min_part_size).unwrap();
        let ranges = plan.ranges();

        prop_assert!(plan.part_count() as u64 <= MAX_PARTS);
        prop_assert!(plan.part_size() >= min_part_size);
        prop_assert_eq!(plan.part_size(), source_size.div_ceil(MAX_PARTS).max(min_part_size));

        let (tail, body) = ranges.split_last().unwrap();
        for range in body {
            prop_assert_eq!(range.byte_count(), plan.part_size());
        }
        prop_assert!(tail.byte_count() <= plan.part_size());
        prop_assert!(tail.byte_count() >= 1);
    }

    #[test]
    fn props_jobs_are_numbered_contiguously(
        source_size in MIN_COPY_SIZE..(2 * 1024 * MIN_PART_SIZE),
    ) {
        let plan = PartPlan::new(source_size, MIN_PART_SIZE).unwrap();
        let expected = plan.part_count();
        let session = Arc::new(UploadSession::new(ObjectLocation::new("dst", "k"), "u"));

        let jobs = plan.into_jobs(&session);
        prop_assert_eq!(jobs.len(), expected);
        for (index, job) in jobs.iter().enumerate() {
            prop_assert_eq!(job.part_number as usize, index + 1);
            prop_assert_eq!(job.session.upload_id(), "u");
        }
    }

    #[test]
    fn props_sources_below_the_minimum_are_rejected(
        source_size in 0..MIN_COPY_SIZE,
    ) {
        prop_assert!(PartPlan::new(source_size, MIN_PART_SIZE).is_err());
    }
}
