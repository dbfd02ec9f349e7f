//! Render settings
//!
//! Everything the renderer needs to turn a dataset into an image: output
//! size, ray function, transfer function, how image rows are split across
//! ranks, how strips are composited, and sampling jitter.
//!
//! # Main Types
//!
//! - [`RenderSettings`] - Complete render description
//! - [`RayFunctionSettings`] - Which ray function shades each pixel
//! - [`PartitionMode`] - How image rows are assigned to ranks
//! - [`CompositingMode`] - Where the final image is assembled
//! - [`JitterSettings`] - Per-cell sample jitter
//! - [`ArbitratorSettings`] - Conflict resolution for overlapping samples

use super::{DEFAULT_CELL_LIST_CAPACITY, DEFAULT_DEPTH_SAMPLES, DEFAULT_IMAGE_SIZE};
use crate::error::{Result, VolVisError};
use crate::render::ray_function::{
    CompositeRayFunction, DistanceToValueRayFunction, MaximumIntensityRayFunction, RayFunction,
    ThresholdRayFunction, TransferFunction,
};
use serde::{Deserialize, Serialize};

/// Complete render description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    /// Output image width in pixels
    #[serde(default = "default_image_size")]
    pub width: usize,

    /// Output image height in pixels
    #[serde(default = "default_image_size")]
    pub height: usize,

    /// Samples along each ray
    #[serde(default = "default_depth_samples")]
    pub depth_samples: usize,

    /// Background RGB
    #[serde(default)]
    pub background: [u8; 3],

    #[serde(default)]
    pub ray_function: RayFunctionSettings,

    #[serde(default)]
    pub transfer_function: TransferFunction,

    #[serde(default)]
    pub partition: PartitionMode,

    #[serde(default)]
    pub compositing: CompositingMode,

    #[serde(default)]
    pub jitter: JitterSettings,

    /// Initial primitive capacity of each cell list
    #[serde(default = "default_cell_list_capacity")]
    pub cell_list_capacity: usize,

    /// Variable the ray function reads
    #[serde(default = "default_primary_variable")]
    pub primary_variable: String,

    /// Extra variables carried with every sample
    #[serde(default)]
    pub secondary_variables: Vec<String>,

    /// Resolve overlapping samples by comparing a variable
    #[serde(default)]
    pub arbitrator: Option<ArbitratorSettings>,

    /// Render only cells of these materials; empty renders everything
    #[serde(default)]
    pub materials: Vec<String>,
}

fn default_image_size() -> usize {
    DEFAULT_IMAGE_SIZE
}

fn default_depth_samples() -> usize {
    DEFAULT_DEPTH_SAMPLES
}

fn default_cell_list_capacity() -> usize {
    DEFAULT_CELL_LIST_CAPACITY
}

fn default_primary_variable() -> String {
    "density".to_string()
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: DEFAULT_IMAGE_SIZE,
            height: DEFAULT_IMAGE_SIZE,
            depth_samples: DEFAULT_DEPTH_SAMPLES,
            background: [0, 0, 0],
            ray_function: RayFunctionSettings::default(),
            transfer_function: TransferFunction::default(),
            partition: PartitionMode::default(),
            compositing: CompositingMode::default(),
            jitter: JitterSettings::default(),
            cell_list_capacity: DEFAULT_CELL_LIST_CAPACITY,
            primary_variable: default_primary_variable(),
            secondary_variables: Vec::new(),
            arbitrator: None,
            materials: Vec::new(),
        }
    }
}

impl RenderSettings {
    /// Check sizes, variable names and the transfer function.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.depth_samples == 0 {
            return Err(VolVisError::Config(format!(
                "Image size must be non-zero, got {}x{}x{}",
                self.width, self.height, self.depth_samples
            )));
        }
        if self.cell_list_capacity == 0 {
            return Err(VolVisError::Config(
                "Cell list capacity must be non-zero".to_string(),
            ));
        }
        if self.primary_variable.is_empty() {
            return Err(VolVisError::Config("Primary variable is not set".to_string()));
        }
        if self.materials.iter().any(|m| m.trim().is_empty()) {
            return Err(VolVisError::Config("Material names must not be blank".to_string()));
        }
        if self.secondary_variables.contains(&self.primary_variable) {
            return Err(VolVisError::Config(format!(
                "'{}' is both primary and secondary",
                self.primary_variable
            )));
        }
        if let Some(arb) = &self.arbitrator {
            if !self.variables().contains(&arb.variable) {
                return Err(VolVisError::Config(format!(
                    "Arbitrator variable '{}' is not rendered",
                    arb.variable
                )));
            }
        }
        validate_transfer_function(&self.transfer_function)
    }

    /// Primary variable followed by the secondaries.
    pub fn variables(&self) -> Vec<String> {
        std::iter::once(self.primary_variable.clone())
            .chain(self.secondary_variables.iter().cloned())
            .collect()
    }

    /// Jitter seed when jitter is enabled
    pub fn jitter_seed(&self) -> Option<u64> {
        self.jitter.enabled.then_some(self.jitter.seed)
    }

    /// Instantiate the configured ray function.
    pub fn build_ray_function(&self) -> Box<dyn RayFunction> {
        let transfer = self.transfer_function.clone();
        match self.ray_function {
            RayFunctionSettings::Composite => Box::new(CompositeRayFunction::new(transfer)),
            RayFunctionSettings::Threshold { value } => {
                Box::new(ThresholdRayFunction::new(value, transfer))
            }
            RayFunctionSettings::DistanceToValue { value } => {
                Box::new(DistanceToValueRayFunction::new(value))
            }
            RayFunctionSettings::MaximumIntensity => {
                Box::new(MaximumIntensityRayFunction::new(transfer))
            }
        }
    }
}

fn validate_transfer_function(tf: &TransferFunction) -> Result<()> {
    if tf.points.is_empty() {
        return Err(VolVisError::Config(
            "Transfer function has no control points".to_string(),
        ));
    }
    for p in &tf.points {
        if !(0.0..=1.0).contains(&p.position) || !(0.0..=1.0).contains(&p.opacity) {
            return Err(VolVisError::Config(format!(
                "Control point at {} with opacity {} is outside [0, 1]",
                p.position, p.opacity
            )));
        }
    }
    if tf.points.windows(2).any(|w| w[0].position > w[1].position) {
        return Err(VolVisError::Config(
            "Transfer function control points are not sorted".to_string(),
        ));
    }
    if let Some([lo, hi]) = tf.range {
        if lo > hi {
            return Err(VolVisError::Config(format!(
                "Transfer function range [{}, {}] is inverted",
                lo, hi
            )));
        }
    }
    Ok(())
}

/// Ray function selection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type")]
pub enum RayFunctionSettings {
    /// Front-to-back opacity accumulation
    #[default]
    Composite,
    /// Color of the first sample crossing `value`
    Threshold { value: f64 },
    /// Grey level from the depth at which `value` is crossed
    DistanceToValue { value: f64 },
    /// Largest sample along the ray
    MaximumIntensity,
}

impl std::fmt::Display for RayFunctionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RayFunctionSettings::Composite => write!(f, "Composite"),
            RayFunctionSettings::Threshold { value } => write!(f, "Threshold ({})", value),
            RayFunctionSettings::DistanceToValue { value } => {
                write!(f, "Distance to value ({})", value)
            }
            RayFunctionSettings::MaximumIntensity => write!(f, "Maximum intensity"),
        }
    }
}

/// How image rows are split across ranks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PartitionMode {
    /// Equal row counts
    Uniform,
    /// Equal estimated sample counts per strip
    #[default]
    Balanced,
}

impl std::fmt::Display for PartitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionMode::Uniform => write!(f, "Uniform"),
            PartitionMode::Balanced => write!(f, "Balanced"),
        }
    }
}

/// Where strips are assembled into the final image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CompositingMode {
    /// Only `root` holds the image
    GatherToRoot { root: usize },
    /// Every rank holds the image
    AllGather,
}

impl Default for CompositingMode {
    fn default() -> Self {
        CompositingMode::GatherToRoot { root: 0 }
    }
}

/// Per-cell sample jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JitterSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_jitter_seed")]
    pub seed: u64,
}

fn default_jitter_seed() -> u64 {
    0x5EED
}

impl Default for JitterSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            seed: default_jitter_seed(),
        }
    }
}

/// Keep the larger (or smaller) value of `variable` when samples collide
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbitratorSettings {
    pub variable: String,

    #[serde(default = "default_prefer_larger")]
    pub prefer_larger: bool,
}

fn default_prefer_larger() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::ray_function::ControlPoint;

    #[test]
    fn test_render_settings_default() {
        let settings = RenderSettings::default();
        assert_eq!(settings.width, DEFAULT_IMAGE_SIZE);
        assert_eq!(settings.partition, PartitionMode::Balanced);
        assert_eq!(settings.compositing, CompositingMode::GatherToRoot { root: 0 });
        assert!(settings.validate().is_ok());
        assert_eq!(settings.jitter_seed(), None);
    }

    #[test]
    fn test_zero_size_rejected() {
        let settings = RenderSettings {
            height: 0,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(VolVisError::Config(_))));
    }

    #[test]
    fn test_unsorted_transfer_function_rejected() {
        let mut settings = RenderSettings::default();
        settings.transfer_function.points = vec![
            ControlPoint {
                position: 0.8,
                color: [0; 3],
                opacity: 0.1,
            },
            ControlPoint {
                position: 0.2,
                color: [0; 3],
                opacity: 0.1,
            },
        ];
        assert!(settings.validate().is_err());

        settings.transfer_function = TransferFunction {
            range: Some([1.0, 0.0]),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_material_selection() {
        let settings: RenderSettings = toml::from_str("materials = [\"left\"]").unwrap();
        assert_eq!(settings.materials, vec!["left".to_string()]);
        assert!(settings.validate().is_ok());
        assert!(RenderSettings::default().materials.is_empty());

        let blank = RenderSettings {
            materials: vec![" ".to_string()],
            ..Default::default()
        };
        assert!(matches!(blank.validate(), Err(VolVisError::Config(_))));
    }

    #[test]
    fn test_arbitrator_variable_must_be_rendered() {
        let mut settings = RenderSettings {
            secondary_variables: vec!["material".to_string()],
            ..Default::default()
        };
        settings.arbitrator = Some(ArbitratorSettings {
            variable: "pressure".to_string(),
            prefer_larger: true,
        });
        assert!(settings.validate().is_err());
        settings.arbitrator = Some(ArbitratorSettings {
            variable: "material".to_string(),
            prefer_larger: false,
        });
        assert!(settings.validate().is_ok());
        assert_eq!(settings.variables(), vec!["density", "material"]);
    }

    #[test]
    fn test_ray_function_selection() {
        let mut settings = RenderSettings::default();
        assert_eq!(settings.build_ray_function().name(), "Composite");
        settings.ray_function = RayFunctionSettings::Threshold { value: 0.5 };
        assert_eq!(settings.build_ray_function().name(), "Threshold");
        assert_eq!(settings.ray_function.to_string(), "Threshold (0.5)");
    }

    #[test]
    fn test_tagged_enums_serialize() {
        let json = serde_json::to_string(&RayFunctionSettings::DistanceToValue { value: 2.0 }).unwrap();
        assert_eq!(json, r#"{"type":"DistanceToValue","value":2.0}"#);
        let mode: CompositingMode = serde_json::from_str(r#"{"type":"AllGather"}"#).unwrap();
        assert_eq!(mode, CompositingMode::AllGather);
    }
}
