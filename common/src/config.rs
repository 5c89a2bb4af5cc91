use crate::ori::RotatePivot;
use serde::{Deserialize, Serialize};

/// Tuning for agent locomotion
///
/// Distances are world units (cm), speeds in units per second. Defaults
/// describe a human-sized agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoveConfig {
    pub max_walk_speed: f32,
    pub max_walk_speed_crouched: f32,
    pub max_swim_speed: f32,
    pub max_fly_speed: f32,
    pub max_acceleration: f32,
    pub braking_deceleration_walking: f32,
    pub braking_deceleration_falling: f32,
    pub braking_deceleration_swimming: f32,
    pub braking_deceleration_flying: f32,
    pub ground_friction: f32,
    pub braking_friction_factor: f32,
    /// Lateral friction applied while airborne
    pub falling_lateral_friction: f32,

    /// Magnitude of world gravity before scaling
    pub gravity_magnitude: f32,
    /// Fall speed clamp outside fluid volumes
    pub terminal_velocity: f32,
    pub jump_velocity: f32,
    /// Seconds a held jump keeps applying its force
    pub jump_max_hold_time: f32,
    /// Upward speed granted when jumping out of water at an edge
    pub out_of_water_jump_velocity: f32,
    pub apply_gravity_while_jumping: bool,
    /// Fraction of lateral control retained while airborne
    pub air_control: f32,
    pub air_control_boost_multiplier: f32,
    /// Lateral speed under which the air control boost kicks in
    pub air_control_boost_velocity_threshold: f32,

    /// Minimum up-axis component of a surface normal to walk on it
    pub walkable_floor_z: f32,
    pub max_step_height: f32,
    /// Agents can stand on unwalkable edges whose impact point is within
    /// this distance of the capsule perimeter
    pub perch_radius_threshold: f32,
    pub perch_additional_height: f32,
    pub ledge_check_threshold: f32,
    pub can_walk_off_ledges: bool,
    pub can_walk_off_ledges_when_crouching: bool,
    pub use_flat_base_for_floor_checks: bool,
    /// Land on any blocking surface while falling, not only ones opposing
    /// gravity
    pub land_on_any_surface: bool,
    pub maintain_horizontal_ground_velocity: bool,
    pub impart_base_velocity: bool,

    pub align_to_floor: bool,
    pub align_to_gravity: bool,
    pub align_gravity_to_base: bool,
    pub rotate_velocity_with_up: bool,
    pub rotate_pivot: RotatePivot,
    /// Angle in degrees under which up axes count as already aligned;
    /// clamped to `0.25..=1.0` when read
    pub threshold_parallel_angle: f32,

    /// Buoyancy relative to neutral; 1.0 floats in place
    pub buoyancy: f32,

    pub max_simulation_time_step: f32,
    pub max_simulation_iterations: u32,
    pub max_jump_apex_attempts: u32,
    pub max_depenetration_speed: f32,

    pub crouched_half_height: f32,
}

impl Default for MoveConfig {
    fn default() -> Self {
        Self {
            max_walk_speed: 600.0,
            max_walk_speed_crouched: 300.0,
            max_swim_speed: 300.0,
            max_fly_speed: 600.0,
            max_acceleration: 2048.0,
            braking_deceleration_walking: 2048.0,
            braking_deceleration_falling: 0.0,
            braking_deceleration_swimming: 0.0,
            braking_deceleration_flying: 0.0,
            ground_friction: 8.0,
            braking_friction_factor: 2.0,
            falling_lateral_friction: 0.0,

            gravity_magnitude: 980.0,
            terminal_velocity: 4000.0,
            jump_velocity: 600.0,
            jump_max_hold_time: 0.0,
            out_of_water_jump_velocity: 420.0,
            apply_gravity_while_jumping: true,
            air_control: 0.05,
            air_control_boost_multiplier: 2.0,
            air_control_boost_velocity_threshold: 25.0,

            walkable_floor_z: 0.71,
            max_step_height: 45.0,
            perch_radius_threshold: 0.0,
            perch_additional_height: 40.0,
            ledge_check_threshold: 4.0,
            can_walk_off_ledges: true,
            can_walk_off_ledges_when_crouching: false,
            use_flat_base_for_floor_checks: false,
            land_on_any_surface: false,
            maintain_horizontal_ground_velocity: true,
            impart_base_velocity: true,

            align_to_floor: false,
            align_to_gravity: false,
            align_gravity_to_base: false,
            rotate_velocity_with_up: false,
            rotate_pivot: RotatePivot::default(),
            threshold_parallel_angle: 1.0,

            buoyancy: 1.0,

            max_simulation_time_step: 0.05,
            max_simulation_iterations: 8,
            max_jump_apex_attempts: 2,
            max_depenetration_speed: 500.0,

            crouched_half_height: 40.0,
        }
    }
}

impl MoveConfig {
    /// Cosine threshold under which two up axes count as parallel
    pub fn threshold_parallel_cos(&self) -> f32 {
        self.threshold_parallel_angle
            .clamp(0.25, 1.0)
            .to_radians()
            .cos()
    }

    pub fn perch_radius_threshold(&self) -> f32 { self.perch_radius_threshold.max(0.0) }

    /// Radius inside which contacts still support the capsule when
    /// perching is allowed
    pub fn valid_perch_radius(&self, capsule_radius: f32) -> f32 {
        (capsule_radius - self.perch_radius_threshold()).clamp(0.11, capsule_radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn parallel_threshold_is_clamped() {
        let mut config = MoveConfig {
            threshold_parallel_angle: 10.0,
            ..Default::default()
        };
        assert_relative_eq!(
            config.threshold_parallel_cos(),
            1.0_f32.to_radians().cos()
        );
        config.threshold_parallel_angle = 0.0;
        assert_relative_eq!(
            config.threshold_parallel_cos(),
            0.25_f32.to_radians().cos()
        );
    }

    #[test]
    fn perch_radius_never_collapses() {
        let config = MoveConfig {
            perch_radius_threshold: 100.0,
            ..Default::default()
        };
        assert!(config.valid_perch_radius(34.0) >= 0.11);
    }
}
