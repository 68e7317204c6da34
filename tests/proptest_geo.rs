//! Property-based tests for the navigation math.
//!
//! These tests use proptest to verify invariants that should hold for any
//! valid position or heading, catching wrap-around and precision edge cases
//! that table-driven unit tests tend to miss.

use proptest::prelude::*;
use saferoute_core::geo::{
    bearing, compass_name, direction_hint, distance, mutual_facing, normalize_angle,
    relative_bearing, DirectionHint, COMPASS_POINTS, DEFAULT_DIRECTION_TOLERANCE_DEG,
    DEFAULT_FACING_TOLERANCE_DEG, EARTH_RADIUS_M,
};
use saferoute_core::location::PeerSample;
use saferoute_core::navigation::Freshness;
use saferoute_core::peer::PeerRegistry;

/// Strategy for latitudes away from the poles
fn latitude() -> impl Strategy<Value = f64> {
    -89.0..89.0
}

/// Strategy for longitudes away from the antimeridian
fn longitude() -> impl Strategy<Value = f64> {
    -179.0..179.0
}

/// Strategy for any heading, including out-of-range raw sensor values
fn heading() -> impl Strategy<Value = f64> {
    -720.0..720.0
}

fn sample(device_id: &str) -> PeerSample {
    PeerSample {
        device_id: device_id.to_string(),
        heading: None,
        latitude: Some(0.0),
        longitude: Some(0.0),
        timestamp_ms: 0,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: Distance does not depend on direction of travel
    #[test]
    fn distance_is_symmetric(
        lat1 in latitude(), lon1 in longitude(),
        lat2 in latitude(), lon2 in longitude(),
    ) {
        let there = distance(lat1, lon1, lat2, lon2);
        let back = distance(lat2, lon2, lat1, lon1);
        prop_assert!((there - back).abs() < 1e-6, "{} != {}", there, back);
    }

    /// Property: A point is zero meters from itself
    #[test]
    fn distance_to_self_is_zero(lat in latitude(), lon in longitude()) {
        prop_assert!(distance(lat, lon, lat, lon).abs() < 1e-9);
    }

    /// Property: No two points are further apart than half the circumference
    #[test]
    fn distance_is_bounded(
        lat1 in latitude(), lon1 in longitude(),
        lat2 in latitude(), lon2 in longitude(),
    ) {
        let d = distance(lat1, lon1, lat2, lon2);
        prop_assert!(d >= 0.0);
        prop_assert!(d <= std::f64::consts::PI * EARTH_RADIUS_M + 1e-6);
    }

    /// Property: Bearings are always in [0, 360)
    #[test]
    fn bearing_is_normalized(
        lat1 in latitude(), lon1 in longitude(),
        lat2 in latitude(), lon2 in longitude(),
    ) {
        let b = bearing(lat1, lon1, lat2, lon2);
        prop_assert!((0.0..360.0).contains(&b), "bearing {} out of range", b);
    }

    /// Property: Coincident points yield a bearing of zero
    #[test]
    fn bearing_to_self_is_zero(lat in latitude(), lon in longitude()) {
        prop_assert!(bearing(lat, lon, lat, lon).abs() < f64::EPSILON);
    }

    /// Property: Normalization lands in [0, 360) and is idempotent
    #[test]
    fn normalize_angle_is_idempotent(angle in -1.0e6..1.0e6_f64) {
        let once = normalize_angle(angle);
        prop_assert!((0.0..360.0).contains(&once));
        prop_assert!((normalize_angle(once) - once).abs() < 1e-9);
    }

    /// Property: Relative bearings are in (-180, 180]
    #[test]
    fn relative_bearing_is_signed(target in heading(), own in heading()) {
        let rel = relative_bearing(target, own);
        prop_assert!(rel > -180.0 && rel <= 180.0, "relative bearing {} out of range", rel);
    }

    /// Property: Pointing straight at the peer is always facing
    #[test]
    fn same_heading_is_facing(h in heading()) {
        prop_assert_eq!(
            direction_hint(h, h, DEFAULT_DIRECTION_TOLERANCE_DEG),
            DirectionHint::FacingEachOther
        );
    }

    /// Property: Just outside tolerance the hint picks the shorter turn
    #[test]
    fn just_outside_tolerance_turns_the_short_way(h in heading()) {
        prop_assert_eq!(
            direction_hint(h, h + 31.0, DEFAULT_DIRECTION_TOLERANCE_DEG),
            DirectionHint::TurnRight
        );
        prop_assert_eq!(
            direction_hint(h, h - 31.0, DEFAULT_DIRECTION_TOLERANCE_DEG),
            DirectionHint::TurnLeft
        );
    }

    /// Property: Two devices pointed along the great circle face each other
    #[test]
    fn exact_alignment_is_mutual_facing(
        lat1 in latitude(), lon1 in longitude(),
        lat2 in latitude(), lon2 in longitude(),
    ) {
        let b = bearing(lat1, lon1, lat2, lon2);
        prop_assert!(mutual_facing(b, b + 180.0, b, DEFAULT_FACING_TOLERANCE_DEG));
        prop_assert!(!mutual_facing(b + 90.0, b + 180.0, b, DEFAULT_FACING_TOLERANCE_DEG));
    }

    /// Property: Every bearing maps to one of the sixteen compass points
    #[test]
    fn compass_name_is_a_known_point(b in heading()) {
        prop_assert!(COMPASS_POINTS.contains(&compass_name(b)));
    }

    /// Property: Freshness flips exactly at the window boundary
    #[test]
    fn freshness_flips_at_window(window in 1u64..100_000) {
        let window_i64 = i64::try_from(window).unwrap();
        prop_assert_eq!(Freshness::classify(Some(window_i64 - 1), window), Freshness::Fresh);
        prop_assert_eq!(Freshness::classify(Some(window_i64), window), Freshness::Stale);
        prop_assert_eq!(Freshness::classify(None, window), Freshness::Unknown);
    }

    /// Property: Peers survive exactly the TTL and are evicted one ms later
    #[test]
    fn registry_ttl_boundary(seen_at in 0i64..1_000_000_000, ttl in 1i64..100_000) {
        let registry = PeerRegistry::new("SELF0001");
        registry.upsert_at(sample("PEER0001"), seen_at);

        prop_assert!(registry.evict_stale(seen_at + ttl, ttl).is_empty());
        prop_assert_eq!(registry.len(), 1);

        let evicted = registry.evict_stale(seen_at + ttl + 1, ttl);
        prop_assert_eq!(evicted, vec!["PEER0001".to_string()]);
        prop_assert!(registry.is_empty());
    }

    /// Property: The registry never records the local device
    #[test]
    fn registry_ignores_self(now in 0i64..1_000_000_000) {
        let registry = PeerRegistry::new("SELF0001");
        prop_assert!(!registry.upsert_at(sample("SELF0001"), now));
        prop_assert!(registry.is_empty());
    }
}
