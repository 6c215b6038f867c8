//! Property tests over generated inputs, supplementing the fixed examples
//! in spec §8 "Concrete scenarios" with the invariants from §8
//! "Invariants".

use std::cmp::Ordering;
use std::str::FromStr;

use hexcore::archive::{self, Metadata};
use hexcore::version::{Requirement, Version};
use proptest::prelude::*;

fn arb_version() -> impl Strategy<Value = Version> {
    (0u64..5, 0u64..5, 0u64..5).prop_map(|(major, minor, patch)| Version::new(major, minor, patch))
}

fn arb_prerelease_version() -> impl Strategy<Value = Version> {
    (0u64..5, 0u64..5, 0u64..5, 0u64..5).prop_map(|(major, minor, patch, pre)| {
        Version::from_str(&format!("{major}.{minor}.{patch}-{pre}")).unwrap()
    })
}

proptest! {
    /// `compare(v1, v2) = -compare(v2, v1)`, and the relation is total.
    #[test]
    fn version_ordering_is_antisymmetric(a in arb_version(), b in arb_version()) {
        let forward = a.cmp(&b);
        let backward = b.cmp(&a);
        prop_assert_eq!(forward, backward.reverse());
    }

    #[test]
    fn version_ordering_is_antisymmetric_with_prereleases(a in arb_prerelease_version(), b in arb_prerelease_version()) {
        let forward = a.cmp(&b);
        let backward = b.cmp(&a);
        prop_assert_eq!(forward, backward.reverse());
    }

    /// Displaying a version and re-parsing it yields the same (major,
    /// minor, patch) triple and pre-release status; build metadata and
    /// textual quirks (leading zeros the author never wrote) aren't part
    /// of the contract, only ordering-relevant fields are.
    #[test]
    fn version_display_then_parse_round_trips_the_ordering_key(v in arb_version()) {
        let text = v.to_string();
        let reparsed = Version::from_str(&text).unwrap();
        prop_assert_eq!(v.triple(), reparsed.triple());
        prop_assert_eq!(v.cmp(&reparsed), Ordering::Equal);
    }

    /// `~> M.N.P` accepts exactly `[M.N.P, M.(N+1).0)`.
    #[test]
    fn pessimistic_with_patch_matches_the_documented_half_open_range(major in 0u64..4, minor in 0u64..4, patch in 0u64..4) {
        let requirement = Requirement::from_str(&format!("~> {major}.{minor}.{patch}")).unwrap();
        let floor = Version::new(major, minor, patch);
        let just_below_ceiling = Version::new(major, minor + 1, 0);
        prop_assert!(requirement.matches(&floor));
        prop_assert!(!requirement.matches(&just_below_ceiling));
    }

    /// `matches` is a pure function of its two arguments: calling it twice
    /// on equal inputs gives equal answers.
    #[test]
    fn requirement_matching_is_deterministic(major in 0u64..6, minor in 0u64..6, patch in 0u64..6) {
        let requirement = Requirement::from_str("~> 1.2").unwrap();
        let version = Version::new(major, minor, patch);
        prop_assert_eq!(requirement.matches(&version), requirement.matches(&version));
    }

    /// `unpack(pack(meta, files)) == (meta, files)` for any non-empty file
    /// set with ASCII-safe relative names (spec §8 "Archive round-trip").
    #[test]
    fn archive_pack_then_unpack_round_trips(
        file_count in 1usize..4,
        contents in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 1..4),
    ) {
        let files: Vec<(String, Vec<u8>)> = contents
            .into_iter()
            .take(file_count.max(1))
            .enumerate()
            .map(|(i, bytes)| (format!("file_{i}.txt"), bytes))
            .collect();
        prop_assume!(!files.is_empty());

        let metadata = Metadata {
            name: "demo".to_string(),
            version: "1.0.0".to_string(),
            app: Some("demo".to_string()),
            build_tools: vec!["mix".to_string()],
            requirements: vec![],
            files: files.iter().map(|(name, _)| name.clone()).collect(),
        };

        let packed = archive::pack(&metadata, &files).unwrap();
        let dest = tempfile::tempdir().unwrap();
        let unpacked = archive::unpack(&packed, dest.path(), None).unwrap();

        prop_assert_eq!(unpacked.name, metadata.name);
        prop_assert_eq!(unpacked.version, metadata.version);
        for (name, bytes) in &files {
            let on_disk = std::fs::read(dest.path().join(name)).unwrap();
            prop_assert_eq!(&on_disk, bytes);
        }
    }
}
