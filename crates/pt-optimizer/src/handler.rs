//! Parameter handlers: how a sampled vector becomes a solver parameter file.

use serde::{Deserialize, Serialize};
use std::path::Path;

use pt_types::{validation_error, SearchSpace, TuneError, TuneResult};

/// Handler configuration, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandlerConfig {
    /// Explicit, typed, bounded hyperparameters.
    Direct { space: SearchSpace },
    /// Flattened weights of a feature -> hyperparameter network.
    Encoded {
        /// `[n_features, hidden..., n_outputs]`.
        layers: Vec<usize>,
        #[serde(default = "default_weight_stddev")]
        initial_stddev: f64,
    },
}

fn default_weight_stddev() -> f64 {
    0.1
}

/// Encodes, bounds and seeds parameter vectors for one of the two formats.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterHandler {
    Direct(DirectHandler),
    Encoded(EncodedHandler),
}

impl ParameterHandler {
    pub fn from_config(config: &HandlerConfig) -> TuneResult<Self> {
        match config {
            HandlerConfig::Direct { space } => Ok(Self::Direct(DirectHandler::new(space.clone())?)),
            HandlerConfig::Encoded {
                layers,
                initial_stddev,
            } => Ok(Self::Encoded(EncodedHandler::new(
                layers.clone(),
                *initial_stddev,
            )?)),
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Self::Direct(h) => h.dimension(),
            Self::Encoded(h) => h.dimension(),
        }
    }

    /// Clamp/round in place according to each dimension's declared type.
    pub fn bound(&self, params: &mut [f64]) {
        match self {
            Self::Direct(h) => h.bound(params),
            Self::Encoded(_) => {}
        }
    }

    pub fn encode(&self, params: &[f64]) -> String {
        match self {
            Self::Direct(h) => h.encode(params),
            Self::Encoded(h) => h.encode(params),
        }
    }

    /// Parse a persisted parameter file back into a vector.
    pub fn decode(&self, text: &str) -> TuneResult<Vec<f64>> {
        let params = match self {
            Self::Direct(h) => h.decode(text)?,
            Self::Encoded(h) => h.decode(text)?,
        };
        if params.len() != self.dimension() {
            return Err(validation_error!(
                "expected {} parameters, found {}",
                self.dimension(),
                params.len()
            ));
        }
        Ok(params)
    }

    /// Write the encoded form of `params` to `path`.
    pub fn save(&self, params: &[f64], path: &Path) -> TuneResult<()> {
        std::fs::write(path, self.encode(params))?;
        Ok(())
    }

    /// `(mean, stddev)` of the starting search distribution.
    pub fn initial_distribution_params(&self) -> (Vec<f64>, Vec<f64>) {
        match self {
            Self::Direct(h) => h.initial_distribution_params(),
            Self::Encoded(h) => h.initial_distribution_params(),
        }
    }
}

/// One value per line, in declared order.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectHandler {
    space: SearchSpace,
}

impl DirectHandler {
    pub fn new(space: SearchSpace) -> TuneResult<Self> {
        space.validate()?;
        Ok(Self { space })
    }

    pub fn dimension(&self) -> usize {
        self.space.len()
    }

    pub fn bound(&self, params: &mut [f64]) {
        for (value, def) in params.iter_mut().zip(&self.space.parameters) {
            *value = def.bound(*value);
        }
    }

    pub fn encode(&self, params: &[f64]) -> String {
        let mut out = String::new();
        for (value, def) in params.iter().zip(&self.space.parameters) {
            out.push_str(&def.format_value(*value));
            out.push('\n');
        }
        out
    }

    pub fn decode(&self, text: &str) -> TuneResult<Vec<f64>> {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| parse_value(line.trim()))
            .collect()
    }

    pub fn initial_distribution_params(&self) -> (Vec<f64>, Vec<f64>) {
        self.space
            .parameters
            .iter()
            .map(|p| (p.initial_mean, p.initial_stddev))
            .unzip()
    }
}

/// Shape header line followed by the flat weight list.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedHandler {
    layers: Vec<usize>,
    initial_stddev: f64,
}

impl EncodedHandler {
    pub fn new(layers: Vec<usize>, initial_stddev: f64) -> TuneResult<Self> {
        if layers.len() < 2 {
            return Err(TuneError::Config(format!(
                "network needs at least an input and an output layer, got {layers:?}"
            )));
        }
        if layers.contains(&0) {
            return Err(TuneError::Config(format!(
                "network layers must be non-empty, got {layers:?}"
            )));
        }
        if !initial_stddev.is_finite() || initial_stddev < 0.0 {
            return Err(TuneError::Config(format!(
                "invalid initial weight stddev {initial_stddev}"
            )));
        }
        Ok(Self {
            layers,
            initial_stddev,
        })
    }

    pub fn layers(&self) -> &[usize] {
        &self.layers
    }

    /// Weights plus biases of every consecutive layer pair.
    pub fn dimension(&self) -> usize {
        self.layers
            .windows(2)
            .map(|pair| pair[0] * pair[1] + pair[1])
            .sum()
    }

    pub fn encode(&self, params: &[f64]) -> String {
        let header: Vec<String> = self.layers.iter().map(|n| n.to_string()).collect();
        let weights: Vec<String> = params.iter().map(|w| w.to_string()).collect();
        format!("{}\n{}", header.join(" "), weights.join(" "))
    }

    pub fn decode(&self, text: &str) -> TuneResult<Vec<f64>> {
        let mut lines = text.lines();
        let header: Vec<usize> = lines
            .next()
            .unwrap_or_default()
            .split_whitespace()
            .map(|n| {
                n.parse()
                    .map_err(|_| validation_error!("bad layer size '{n}'"))
            })
            .collect::<TuneResult<_>>()?;
        if header != self.layers {
            return Err(validation_error!(
                "network shape {header:?} does not match {:?}",
                self.layers
            ));
        }
        lines
            .flat_map(str::split_whitespace)
            .map(parse_value)
            .collect()
    }

    pub fn initial_distribution_params(&self) -> (Vec<f64>, Vec<f64>) {
        let n = self.dimension();
        (vec![0.0; n], vec![self.initial_stddev; n])
    }
}

fn parse_value(token: &str) -> TuneResult<f64> {
    token
        .parse()
        .map_err(|_| validation_error!("bad parameter value '{token}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct() -> ParameterHandler {
        let space = SearchSpace::new()
            .add_float("epsilon", Some(0.0), Some(1.0), 0.5, 0.5)
            .add_int("stall_size", Some(0.0), None, 10.0, 10.0)
            .add_float("fraction_local", Some(0.0), Some(1.0), 0.5, 0.5);
        ParameterHandler::from_config(&HandlerConfig::Direct { space }).unwrap()
    }

    #[test]
    fn direct_bound_clamps_and_rounds() {
        let handler = direct();
        let mut params = vec![1.4, 3.6, -0.2];
        handler.bound(&mut params);
        assert_eq!(params, vec![1.0, 4.0, 0.0]);
    }

    #[test]
    fn direct_encode_writes_one_value_per_line() {
        let handler = direct();
        assert_eq!(handler.encode(&[0.25, 7.4, 1.0]), "0.25\n7\n1\n");
    }

    #[test]
    fn direct_initial_distribution_matches_space() {
        let (mean, stddev) = direct().initial_distribution_params();
        assert_eq!(mean, vec![0.5, 10.0, 0.5]);
        assert_eq!(stddev, vec![0.5, 10.0, 0.5]);
    }

    #[test]
    fn encoded_dimension_counts_weights_and_biases() {
        let handler = EncodedHandler::new(vec![4, 6], 0.1).unwrap();
        assert_eq!(handler.dimension(), 4 * 6 + 6);

        let deep = EncodedHandler::new(vec![4, 8, 6], 0.1).unwrap();
        assert_eq!(deep.dimension(), (4 * 8 + 8) + (8 * 6 + 6));
    }

    #[test]
    fn encoded_writes_header_then_weights() {
        let handler = ParameterHandler::from_config(&HandlerConfig::Encoded {
            layers: vec![1, 2],
            initial_stddev: 0.1,
        })
        .unwrap();
        assert_eq!(handler.dimension(), 4);

        let mut params = vec![0.5, -1.5, 2.0, 300.0];
        handler.bound(&mut params);
        assert_eq!(params, vec![0.5, -1.5, 2.0, 300.0]);
        assert_eq!(handler.encode(&params), "1 2\n0.5 -1.5 2 300");
    }

    #[test]
    fn malformed_shape_is_a_configuration_error() {
        let single = HandlerConfig::Encoded {
            layers: vec![4],
            initial_stddev: 0.1,
        };
        assert!(matches!(
            ParameterHandler::from_config(&single),
            Err(TuneError::Config(_))
        ));

        let empty_layer = HandlerConfig::Encoded {
            layers: vec![4, 0, 6],
            initial_stddev: 0.1,
        };
        assert!(ParameterHandler::from_config(&empty_layer).is_err());
    }

    #[test]
    fn config_deserializes_from_tagged_json() {
        let config: HandlerConfig =
            serde_json::from_str(r#"{"kind": "encoded", "layers": [4, 6]}"#).unwrap();
        assert_eq!(
            config,
            HandlerConfig::Encoded {
                layers: vec![4, 6],
                initial_stddev: 0.1
            }
        );
    }

    #[test]
    fn decode_reads_back_saved_files() {
        let handler = direct();
        assert_eq!(handler.decode("0.25\n7\n1\n").unwrap(), vec![0.25, 7.0, 1.0]);
        assert!(handler.decode("0.25\n7\n").is_err());
        assert!(handler.decode("0.25\nseven\n1\n").is_err());

        let encoded = ParameterHandler::from_config(&HandlerConfig::Encoded {
            layers: vec![1, 2],
            initial_stddev: 0.1,
        })
        .unwrap();
        assert_eq!(
            encoded.decode("1 2\n0.5 -1.5 2 300").unwrap(),
            vec![0.5, -1.5, 2.0, 300.0]
        );
        assert!(encoded.decode("2 2\n0.5 -1.5 2 300").is_err());
    }

    #[test]
    fn save_writes_encoded_form() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.txt");
        direct().save(&[0.1, 2.0, 0.9], &path).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "0.1\n2\n0.9\n");
    }
}
