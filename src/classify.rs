//! Index to color classification.
//!
//! A scheme is an ordered list of colors separated by upper limits. A value
//! falls in bucket `i` when `limit[i - 1] <= value < limit[i]`; the last
//! bucket has no upper bound.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("cannot find scheme '{0}'")]
    UnknownScheme(String),
    #[error("malformed color '{0}': expected 6 hex digits")]
    MalformedColor(String),
    #[error("invalid scheme '{name}': {reason}")]
    InvalidScheme { name: String, reason: String },
}

/// An RGB color. Serializes as `[r, g, b]`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Rgb {
    type Err = ClassifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        colorhex_to_rgb(s)
    }
}

/// Decode `#rrggbb` (the `#` is optional) into its three channels.
pub fn colorhex_to_rgb(chex: &str) -> Result<Rgb, ClassifyError> {
    let malformed = || ClassifyError::MalformedColor(chex.to_string());
    let digits = chex.strip_prefix('#').unwrap_or(chex);

    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(malformed());
    }

    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| malformed());

    Ok(Rgb(channel(0)?, channel(2)?, channel(4)?))
}

const CITEAIR_COLORS: &[&str] = &["#79bc6a", "#bbcf4c", "#eec20b", "#f29305", "#960018"];
const CITEAIR_LIMITS: &[f64] = &[25.0, 50.0, 75.0, 100.0];

const IQA_COLORS: &[&str] = &["#00ff00", "#ffff00", "#ff5e00", "#ff0000"];
const IQA_LIMITS: &[f64] = &[0.5, 0.75, 0.9];

const IQA_FINE_COLORS: &[&str] = &[
    "#32B8A3", "#5CCB60", "#99E600", "#C3F000", "#FFFF00", "#FFD100", "#FFAA00", "#FF5E00",
    "#FF0000",
];
const IQA_FINE_LIMITS: &[f64] = &[0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9];

/// The registered schemes, by name.
pub const STANDARD_SCHEMES: &[(&str, &[&str], &[f64])] = &[
    ("citeair", CITEAIR_COLORS, CITEAIR_LIMITS),
    ("iqa", IQA_COLORS, IQA_LIMITS),
    ("iqa_", IQA_FINE_COLORS, IQA_FINE_LIMITS),
];

/// A named classification table with its colors already decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationScheme {
    name: String,
    colors: Vec<Rgb>,
    limits: Vec<f64>,
}

impl ClassificationScheme {
    /// Builds a scheme, checking that limits strictly increase and that
    /// there is exactly one more color than limits.
    pub fn new(name: &str, colors: &[&str], limits: &[f64]) -> Result<Self, ClassifyError> {
        let invalid = |reason: String| ClassifyError::InvalidScheme {
            name: name.to_string(),
            reason,
        };

        if colors.len() != limits.len() + 1 {
            return Err(invalid(format!(
                "{} colors for {} limits",
                colors.len(),
                limits.len()
            )));
        }
        if limits.iter().any(|l| !l.is_finite()) {
            return Err(invalid("limits must be finite".to_string()));
        }
        if limits.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid("limits must be strictly increasing".to_string()));
        }

        let colors = colors
            .iter()
            .map(|c| colorhex_to_rgb(c))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ClassificationScheme {
            name: name.to_string(),
            colors,
            limits: limits.to_vec(),
        })
    }

    /// Index of the first bucket whose limit is strictly greater than
    /// `value`, or of the unbounded last bucket.
    ///
    /// NaN is never below a limit, so it lands in the last bucket.
    pub fn bucket(&self, value: f64) -> usize {
        self.limits
            .iter()
            .position(|&limit| value < limit)
            .unwrap_or(self.limits.len())
    }

    pub fn classify(&self, value: f64) -> Rgb {
        self.colors[self.bucket(value)]
    }
}

/// All schemes known to the service.
#[derive(Debug, Clone)]
pub struct Classifier {
    schemes: BTreeMap<String, ClassificationScheme>,
}

impl Classifier {
    pub fn new(schemes: impl IntoIterator<Item = ClassificationScheme>) -> Self {
        Classifier {
            schemes: schemes
                .into_iter()
                .map(|s| (s.name.clone(), s))
                .collect(),
        }
    }

    /// The citeair, iqa and iqa_ schemes.
    pub fn standard() -> Result<Self, ClassifyError> {
        let schemes = STANDARD_SCHEMES
            .iter()
            .map(|(name, colors, limits)| ClassificationScheme::new(name, colors, limits))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Classifier::new(schemes))
    }

    pub fn scheme(&self, name: &str) -> Result<&ClassificationScheme, ClassifyError> {
        self.schemes
            .get(name)
            .ok_or_else(|| ClassifyError::UnknownScheme(name.to_string()))
    }

    pub fn scheme_names(&self) -> impl Iterator<Item = &str> {
        self.schemes.keys().map(String::as_str)
    }

    pub fn bucket(&self, value: f64, scheme: &str) -> Result<usize, ClassifyError> {
        Ok(self.scheme(scheme)?.bucket(value))
    }

    pub fn classify(&self, value: f64, scheme: &str) -> Result<Rgb, ClassifyError> {
        Ok(self.scheme(scheme)?.classify(value))
    }
}

fn standard_classifier() -> Result<&'static Classifier, ClassifyError> {
    static STANDARD: OnceLock<Result<Classifier, ClassifyError>> = OnceLock::new();

    STANDARD
        .get_or_init(Classifier::standard)
        .as_ref()
        .map_err(Clone::clone)
}

/// Classify `value` against one of the standard schemes.
pub fn classify(value: f64, scheme: &str) -> Result<Rgb, ClassifyError> {
    standard_classifier()?.classify(value, scheme)
}

pub fn bucket(value: f64, scheme: &str) -> Result<usize, ClassifyError> {
    standard_classifier()?.bucket(value, scheme)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(value: f64, scheme: &str) -> String {
        classify(value, scheme).unwrap().to_hex()
    }

    #[test]
    fn limits_are_exclusive_upper_bounds() {
        assert_eq!(hex(24.999, "citeair"), "#79bc6a");
        assert_eq!(hex(25.0, "citeair"), "#bbcf4c");
        assert_eq!(hex(99.9, "citeair"), "#f29305");
        assert_eq!(hex(100.0, "citeair"), "#960018");
        assert_eq!(hex(1e9, "citeair"), "#960018");
    }

    #[test]
    fn iqa_extremes() {
        assert_eq!(hex(0.0, "iqa"), "#00ff00");
        assert_eq!(hex(-3.0, "iqa"), "#00ff00");
        assert_eq!(hex(0.5, "iqa"), "#ffff00");
        assert_eq!(hex(0.95, "iqa"), "#ff0000");
    }

    #[test]
    fn fine_scheme_buckets() {
        assert_eq!(bucket(0.1, "iqa_").unwrap(), 0);
        assert_eq!(bucket(0.2, "iqa_").unwrap(), 1);
        assert_eq!(bucket(0.85, "iqa_").unwrap(), 7);
        assert_eq!(bucket(0.9, "iqa_").unwrap(), 8);
        assert_eq!(classify(0.45, "iqa_").unwrap(), Rgb(0xC3, 0xF0, 0x00));
    }

    #[test]
    fn nan_lands_in_last_bucket() {
        assert_eq!(bucket(f64::NAN, "iqa").unwrap(), 3);
    }

    #[test]
    fn classification_is_monotonic() {
        for (name, _, limits) in STANDARD_SCHEMES {
            let top = limits.last().copied().unwrap_or(1.0) * 1.5;
            let mut previous = 0;
            for step in -10..=1000 {
                let value = top * step as f64 / 1000.0;
                let current = bucket(value, name).unwrap();
                assert!(current >= previous, "{} at {}", name, value);
                previous = current;
            }
        }
    }

    #[test]
    fn decodes_hex_colors() {
        assert_eq!(colorhex_to_rgb("#960018").unwrap(), Rgb(150, 0, 24));
        assert_eq!(colorhex_to_rgb("FFD100").unwrap(), Rgb(255, 209, 0));
        assert_eq!("#00ff00".parse::<Rgb>().unwrap(), Rgb(0, 255, 0));
    }

    #[test]
    fn rejects_malformed_colors() {
        for bad in ["", "#", "#12345", "#1234567", "#gg0000", "##12345", "12 345"] {
            assert_eq!(
                colorhex_to_rgb(bad),
                Err(ClassifyError::MalformedColor(bad.to_string()))
            );
        }
    }

    #[test]
    fn scheme_colors_survive_reencoding() {
        for (_, colors, _) in STANDARD_SCHEMES {
            for color in colors.iter() {
                let rgb = colorhex_to_rgb(color).unwrap();
                assert!(rgb.to_hex().eq_ignore_ascii_case(color));
                assert_eq!(colorhex_to_rgb(&rgb.to_hex()).unwrap(), rgb);
            }
        }
    }

    #[test]
    fn unknown_scheme_fails_for_every_value() {
        for value in [f64::NEG_INFINITY, -1.0, 0.0, 0.5, 25.0, 1e12, f64::NAN] {
            assert_eq!(
                classify(value, "IQA"),
                Err(ClassifyError::UnknownScheme("IQA".to_string()))
            );
        }
    }

    #[test]
    fn scheme_invariants_are_checked() {
        assert!(matches!(
            ClassificationScheme::new("short", &["#000000"], &[1.0]),
            Err(ClassifyError::InvalidScheme { .. })
        ));
        assert!(matches!(
            ClassificationScheme::new("flat", &["#000000", "#111111", "#222222"], &[1.0, 1.0]),
            Err(ClassifyError::InvalidScheme { .. })
        ));
        assert!(matches!(
            ClassificationScheme::new("bad", &["#000000", "nope"], &[1.0]),
            Err(ClassifyError::MalformedColor(_))
        ));
    }

    #[test]
    fn standard_classifier_registers_three_schemes() {
        let classifier = Classifier::standard().unwrap();
        let names: Vec<_> = classifier.scheme_names().collect();
        assert_eq!(names, vec!["citeair", "iqa", "iqa_"]);
    }
}
