//! Millimetre hints in a prompt and the bounding box derived from them.

use serde::{Deserialize, Serialize};

const DEFAULT_AXIS_MM: f64 = 10.0;
const MIN_AXIS_MM: f64 = 1.0;

/// Collects every `<number> mm` magnitude in `prompt`, in order.
///
/// Matching is case-insensitive, leftmost-first and non-overlapping. A
/// number is a run of ASCII digits with an optional `.digits` fraction;
/// whitespace may separate it from the unit.
pub fn extract_dimensions_mm(prompt: &str) -> Vec<f64> {
    let chars: Vec<char> = prompt.to_lowercase().chars().collect();
    let mut dimensions = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        match match_dimension(&chars, start) {
            Some((value, end)) => {
                dimensions.push(value);
                start = end;
            }
            None => start += 1,
        }
    }
    dimensions
}

fn match_dimension(chars: &[char], start: usize) -> Option<(f64, usize)> {
    let integer_end = digit_run(chars, start);
    if integer_end == start {
        return None;
    }

    let mut number_ends = Vec::with_capacity(2);
    if chars.get(integer_end) == Some(&'.') {
        let fraction_end = digit_run(chars, integer_end + 1);
        if fraction_end > integer_end + 1 {
            number_ends.push(fraction_end);
        }
    }
    number_ends.push(integer_end);

    number_ends.into_iter().find_map(|number_end| {
        let end = unit_end(chars, number_end)?;
        let text: String = chars[start..number_end].iter().collect();
        text.parse().ok().map(|value| (value, end))
    })
}

fn digit_run(chars: &[char], start: usize) -> usize {
    let mut end = start;
    while chars.get(end).is_some_and(char::is_ascii_digit) {
        end += 1;
    }
    end
}

fn unit_end(chars: &[char], start: usize) -> Option<usize> {
    let mut cursor = start;
    while chars.get(cursor).is_some_and(|c| c.is_whitespace()) {
        cursor += 1;
    }
    (chars.get(cursor) == Some(&'m') && chars.get(cursor + 1) == Some(&'m')).then_some(cursor + 2)
}

/// Target extent in millimetres along x, y and z.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            x: DEFAULT_AXIS_MM,
            y: DEFAULT_AXIS_MM,
            z: DEFAULT_AXIS_MM,
        }
    }
}

impl BoundingBox {
    /// The first three magnitudes become x, y and z; missing axes are 10 and
    /// every axis is at least 1.
    pub fn from_dimensions(dimensions: &[f64]) -> Self {
        let axis = |index: usize| {
            dimensions
                .get(index)
                .copied()
                .unwrap_or(DEFAULT_AXIS_MM)
                .max(MIN_AXIS_MM)
        };
        Self {
            x: axis(0),
            y: axis(1),
            z: axis(2),
        }
    }

    pub fn from_prompt(prompt: &str) -> Self {
        Self::from_dimensions(&extract_dimensions_mm(prompt))
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Instruction text embedded in the generation prompt.
    pub fn describe(&self) -> String {
        format!(
            "Dimensions ~ [0,0,0] to [{}, {}, {}] in mm (approx).",
            self.x, self.y, self.z
        )
    }

    /// Whether a scene of size `extent` fits this box, allowing each axis to
    /// overshoot by `tolerance` (a fraction of the target).
    ///
    /// Axes are compared largest to largest: the model is free to lay the
    /// object out along any axis.
    pub fn contains_extent(&self, extent: [f64; 3], tolerance: f64) -> bool {
        let mut target = self.as_array();
        let mut actual = extent;
        target.sort_by(|a, b| b.total_cmp(a));
        actual.sort_by(|a, b| b.total_cmp(a));
        target
            .iter()
            .zip(actual)
            .all(|(limit, size)| size.is_finite() && size <= limit * (1.0 + tolerance.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::{BoundingBox, extract_dimensions_mm};

    #[test]
    fn finds_magnitudes_in_order() {
        assert_eq!(
            extract_dimensions_mm("A wrench that is 60mm long and 10 MM wide"),
            vec![60.0, 10.0]
        );
        assert_eq!(extract_dimensions_mm("a 2.5mm pin"), vec![2.5]);
        assert_eq!(extract_dimensions_mm("12x5mm"), vec![5.0]);
        assert_eq!(extract_dimensions_mm("3.5.2mm and 7 cm"), vec![5.2]);
        assert!(extract_dimensions_mm("a small cube").is_empty());
        assert!(extract_dimensions_mm("40 m tall").is_empty());
    }

    #[test]
    fn fraction_without_unit_falls_back_to_integer() {
        assert_eq!(extract_dimensions_mm("5.mm"), Vec::<f64>::new());
        assert_eq!(extract_dimensions_mm("5. 6mm"), vec![6.0]);
    }

    #[test]
    fn missing_axes_default_to_ten() {
        assert_eq!(BoundingBox::from_prompt("no numbers"), BoundingBox::default());
        assert_eq!(
            BoundingBox::from_prompt("plate 12mm by 5mm").as_array(),
            [12.0, 5.0, 10.0]
        );
        assert_eq!(
            BoundingBox::from_prompt("a 30mm cube").as_array(),
            [30.0, 10.0, 10.0]
        );
        assert_eq!(
            BoundingBox::from_dimensions(&[1.0, 2.0, 3.0, 4.0]).as_array(),
            [1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn non_positive_axes_clamp_to_one() {
        assert_eq!(
            BoundingBox::from_dimensions(&[0.0, -4.0, 0.5]).as_array(),
            [1.0, 1.0, 1.0]
        );
        assert_eq!(BoundingBox::from_prompt("0mm slot").x, 1.0);
    }

    #[test]
    fn describe_uses_plain_numbers() {
        assert_eq!(
            BoundingBox::from_dimensions(&[60.0, 2.5]).describe(),
            "Dimensions ~ [0,0,0] to [60, 2.5, 10] in mm (approx)."
        );
    }

    #[test]
    fn extent_check_ignores_axis_order() {
        let target = BoundingBox::from_dimensions(&[60.0, 10.0, 10.0]);
        assert!(target.contains_extent([10.0, 59.0, 9.0], 0.0));
        assert!(target.contains_extent([12.0, 70.0, 10.0], 0.25));
        assert!(!target.contains_extent([12.0, 80.0, 10.0], 0.25));
        assert!(!target.contains_extent([f64::NAN, 1.0, 1.0], 0.25));
    }
}
