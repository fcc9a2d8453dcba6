//! Transporter motion kinematics: point-to-point transfer time and the
//! lift/sink vertical profile.
//!
//! Pure, allocation-free numeric functions (the teacher's `domain.rs` shape
//! applied to motion instead of polynomial evaluation domains): each
//! function validates its inputs, computes in `f64`, and rounds up to the
//! next whole second — the only source of conservatism in the core, and
//! easy to audit (spec.md §9).

use crate::model::{Station, Transporter, VerticalProfile};

#[derive(Debug, thiserror::Error)]
pub enum KinematicsError {
    #[error("transporter {0:?} has non-positive v_max")]
    NonPositiveVMax(crate::model::TransporterId),
    #[error("transporter {0:?} has non-positive acceleration")]
    NonPositiveAccel(crate::model::TransporterId),
    #[error("station {station:?} at x={x_mm}mm is outside transporter {transporter:?}'s range [{x_min}, {x_max}]")]
    StationOutOfRange {
        station: crate::model::StationId,
        transporter: crate::model::TransporterId,
        x_mm: i64,
        x_min: i64,
        x_max: i64,
    },
}

/// Round a non-negative `f64` number of seconds up to the next whole second.
#[inline]
fn ceil_seconds(t: f64) -> i64 {
    debug_assert!(t.is_finite() && t >= 0.0);
    t.ceil() as i64
}

/// Horizontal point-to-point transfer time, trapezoidal or triangular
/// velocity profile (spec.md §4.1). Each phase (accel, cruise, decel) is
/// rounded up to a whole second independently before summing, not the
/// aggregate continuous-time total — spec.md §8 Scenario A's worked
/// transfer-times (5s for 1000mm, 9s for 2000mm) only fall out of the
/// per-phase rounding.
pub fn transfer_time_s(
    distance_mm: i64,
    v_max_mm_s: i64,
    a_accel_mm_s2: i64,
    a_decel_mm_s2: i64,
) -> i64 {
    if distance_mm == 0 {
        return 0;
    }
    let d = distance_mm as f64;
    let v_max = v_max_mm_s as f64;
    let a_a = a_accel_mm_s2 as f64;
    let a_d = a_decel_mm_s2 as f64;

    let d_a = 0.5 * v_max * v_max / a_a;
    let d_d = 0.5 * v_max * v_max / a_d;

    if d >= d_a + d_d {
        // Trapezoidal: full acceleration, cruise, full deceleration.
        let accel_s = ceil_seconds(v_max / a_a);
        let decel_s = ceil_seconds(v_max / a_d);
        let cruise_s = ceil_seconds((d - d_a - d_d) / v_max);
        accel_s + decel_s + cruise_s
    } else {
        // Triangular: solve v_p^2/(2 a_a) + v_p^2/(2 a_d) = d for peak v_p.
        let v_p = (2.0 * d / (1.0 / a_a + 1.0 / a_d)).sqrt();
        ceil_seconds(v_p / a_a) + ceil_seconds(v_p / a_d)
    }
}

/// Vertical lift or sink time for one stroke, given the transporter's
/// two-zone (slow near the liquid surface, fast above) profile.
pub fn vertical_time_s(profile: &VerticalProfile) -> f64 {
    let slow_mm = profile.slow_zone_mm.min(profile.stroke_mm) as f64;
    let fast_mm = (profile.stroke_mm - profile.slow_zone_mm).max(0) as f64;
    let slow_v = profile.slow_v_mm_s.max(1) as f64;
    let fast_v = profile.fast_v_mm_s.max(1) as f64;
    slow_mm / slow_v + fast_mm / fast_v
}

fn validate_transporter(t: &Transporter) -> Result<(), KinematicsError> {
    if t.v_max_mm_s <= 0 {
        return Err(KinematicsError::NonPositiveVMax(t.transporter_id));
    }
    if t.a_accel_mm_s2 <= 0 || t.a_decel_mm_s2 <= 0 {
        return Err(KinematicsError::NonPositiveAccel(t.transporter_id));
    }
    Ok(())
}

fn require_in_range(station: &Station, t: &Transporter) -> Result<(), KinematicsError> {
    if !t.covers(station.x_mm) {
        return Err(KinematicsError::StationOutOfRange {
            station: station.station_id,
            transporter: t.transporter_id,
            x_mm: station.x_mm,
            x_min: t.x_min_mm,
            x_max: t.x_max_mm,
        });
    }
    Ok(())
}

/// `lift_time, transfer_time, sink_time` (all whole seconds, rounded up)
/// for moving a batch from `from` to `to` with `transporter`.
///
/// Defined iff both station x-coordinates fall within the transporter's
/// operating range (spec.md §4.1's contract); violating that is a caller
/// bug surfaced here rather than silently clamped.
pub fn transfer_pair_times(
    from: &Station,
    to: &Station,
    t: &Transporter,
) -> Result<(i64, i64, i64), KinematicsError> {
    validate_transporter(t)?;
    require_in_range(from, t)?;
    require_in_range(to, t)?;

    let distance_mm = (to.x_mm - from.x_mm).abs();
    let transfer = transfer_time_s(distance_mm, t.v_max_mm_s, t.a_accel_mm_s2, t.a_decel_mm_s2);
    let lift = ceil_seconds(vertical_time_s(&t.lift));
    let sink = ceil_seconds(vertical_time_s(&t.sink));
    Ok((lift, transfer, sink))
}
