use crate::data::imputation::NanStrategy;
use crate::data::preprocessing::Standardizer;
use crate::error::PipelineError;
use crate::model::loss::LossKind;
use crate::model::{ModelFamily, OutputActivation};
use std::collections::BTreeMap;
use std::fmt;

/// Option names understood by the grid, with their default single value
pub const OPTIONS: [(&str, &str); 6] = [
    ("keras_tuner", "false"),
    ("loss", "binary_crossentropy"),
    ("model", "threelayers"),
    ("nan_handling", "minusone"),
    ("output_layer", "sigmoid"),
    ("standardizer", "none"),
];

/// The grid's default option lists
pub fn default_grid() -> BTreeMap<String, Vec<String>> {
    OPTIONS
        .iter()
        .map(|(name, value)| (name.to_string(), vec![value.to_string()]))
        .collect()
}

fn parse_bool(value: &str) -> Result<bool, PipelineError> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(PipelineError::InvalidOption {
            option: "keras_tuner".to_string(),
            value: value.to_string(),
        }),
    }
}

/// One fully resolved grid point
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    pub loss: LossKind,
    pub nan_handling: NanStrategy,
    pub standardizer: Standardizer,
    pub output_layer: OutputActivation,
    pub model: ModelFamily,
    /// Search the architecture instead of training a fixed one
    pub keras_tuner: bool,
    values: BTreeMap<String, String>,
}

impl Params {
    /// Resolve option values; absent options take their default
    pub fn from_values(values: &BTreeMap<String, String>) -> Result<Self, PipelineError> {
        for name in values.keys() {
            if !OPTIONS.iter().any(|(known, _)| known == name) {
                return Err(PipelineError::InvalidOption {
                    option: name.clone(),
                    value: values[name].clone(),
                });
            }
        }
        let get = |name: &str| -> &str {
            values
                .get(name)
                .map(String::as_str)
                .or_else(|| OPTIONS.iter().find(|(n, _)| *n == name).map(|(_, v)| *v))
                .unwrap_or_default()
        };

        let loss = LossKind::parse(get("loss"))?;
        let nan_handling = NanStrategy::parse(get("nan_handling"))?;
        let standardizer = Standardizer::parse(get("standardizer"))?;
        let output_layer = OutputActivation::parse(get("output_layer"))?;
        let model = ModelFamily::parse(get("model"))?;
        let keras_tuner = parse_bool(get("keras_tuner"))?;

        // canonical spelling, so results written once always match again
        let values = [
            ("keras_tuner", keras_tuner.to_string()),
            ("loss", loss.to_string()),
            ("model", model.to_string()),
            ("nan_handling", nan_handling.to_string()),
            ("output_layer", output_layer.to_string()),
            ("standardizer", standardizer.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Ok(Self {
            loss,
            nan_handling,
            standardizer,
            output_layer,
            model,
            keras_tuner,
            values,
        })
    }

    /// Option name to canonical value, ordered by name
    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    pub fn get(&self, option: &str) -> Option<&str> {
        self.values.get(option).map(String::as_str)
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.values.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        f.write_str(&parts.join(", "))
    }
}

/// Cartesian grid over option value lists.
///
/// Points are enumerated with option names in alphabetical order and the
/// last name varying fastest.
#[derive(Debug, Clone)]
pub struct SearchGrid {
    options: BTreeMap<String, Vec<String>>,
    points: Vec<Params>,
}

impl SearchGrid {
    /// Validate every value and expand the grid
    pub fn new(options: BTreeMap<String, Vec<String>>) -> Result<Self, PipelineError> {
        let mut options = options;
        for (name, value) in OPTIONS {
            options
                .entry(name.to_string())
                .or_insert_with(|| vec![value.to_string()]);
        }

        let mut points = Vec::new();
        if options.values().all(|values| !values.is_empty()) {
            let names: Vec<&String> = options.keys().collect();
            let mut index = vec![0usize; names.len()];
            loop {
                let values: BTreeMap<String, String> = names
                    .iter()
                    .zip(&index)
                    .map(|(name, &i)| ((*name).clone(), options[*name][i].clone()))
                    .collect();
                points.push(Params::from_values(&values)?);

                // odometer increment, last option fastest
                let mut digit = names.len();
                loop {
                    if digit == 0 {
                        return Ok(Self { options, points });
                    }
                    digit -= 1;
                    index[digit] += 1;
                    if index[digit] < options[names[digit]].len() {
                        break;
                    }
                    index[digit] = 0;
                }
            }
        }

        Ok(Self { options, points })
    }

    /// Option names, alphabetical
    pub fn option_names(&self) -> Vec<String> {
        self.options.keys().cloned().collect()
    }

    pub fn points(&self) -> &[Params] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_default_grid_has_one_point() {
        let grid = SearchGrid::new(default_grid()).unwrap();
        assert_eq!(grid.len(), 1);
        let p = &grid.points()[0];
        assert_eq!(p.loss, LossKind::BinaryCrossentropy);
        assert_eq!(p.nan_handling, NanStrategy::MinusOne);
        assert_eq!(p.model, ModelFamily::ThreeLayers);
        assert!(!p.keras_tuner);
        assert_eq!(grid.option_names().len(), 6);
    }

    #[test]
    fn test_enumeration_order() {
        let grid = SearchGrid::new(grid(&[
            ("loss", &["dice", "binary_crossentropy"]),
            ("standardizer", &["none", "standard", "robust"]),
        ]))
        .unwrap();

        assert_eq!(grid.len(), 6);
        let order: Vec<(&str, &str)> = grid
            .points()
            .iter()
            .map(|p| (p.get("loss").unwrap(), p.get("standardizer").unwrap()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("dice", "none"),
                ("dice", "standard"),
                ("dice", "robust"),
                ("binary_crossentropy", "none"),
                ("binary_crossentropy", "standard"),
                ("binary_crossentropy", "robust"),
            ]
        );
    }

    #[test]
    fn test_rejects_unknown_option_and_value() {
        let err = SearchGrid::new(grid(&[("optimizer", &["sgd"])])).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidOption { ref option, .. } if option == "optimizer"
        ));

        let err = SearchGrid::new(grid(&[("loss", &["focal"])])).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidOption { ref option, .. } if option == "loss"));
    }

    #[test]
    fn test_tuner_flag_is_canonical() {
        let grid = SearchGrid::new(grid(&[("keras_tuner", &["True"])])).unwrap();
        let p = &grid.points()[0];
        assert!(p.keras_tuner);
        assert_eq!(p.get("keras_tuner"), Some("true"));
        assert!(p.to_string().starts_with("keras_tuner=true, loss=binary_crossentropy"));
    }

    #[test]
    fn test_empty_value_list_gives_empty_grid() {
        let grid = SearchGrid::new(grid(&[("loss", &[])])).unwrap();
        assert!(grid.is_empty());
    }
}
