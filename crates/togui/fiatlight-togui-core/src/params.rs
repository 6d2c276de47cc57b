//! Widget parameters of the primitive handle kinds and the attributes that
//! configure them.

use crate::attributes::{AttrType, AttrValue, FiatAttributes, PossibleAttr};

const INT_EDIT_TYPES: &[&str] = &["slider", "input", "drag", "knob", "slider_and_minus_plus"];
const FLOAT_EDIT_TYPES: &[&str] = &[
    "slider",
    "input",
    "drag",
    "knob",
    "slider_float_any_range",
    "slider_float_any_range_positive",
];
const BOOL_EDIT_TYPES: &[&str] = &["checkbox", "toggle"];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IntEditType {
    Slider,
    Input,
    Drag,
    Knob,
    SliderAndMinusPlus,
}

impl IntEditType {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "slider" => IntEditType::Slider,
            "input" => IntEditType::Input,
            "drag" => IntEditType::Drag,
            "knob" => IntEditType::Knob,
            "slider_and_minus_plus" => IntEditType::SliderAndMinusPlus,
            _ => return None,
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FloatEditType {
    Slider,
    Input,
    Drag,
    Knob,
    SliderFloatAnyRange,
    SliderFloatAnyRangePositive,
}

impl FloatEditType {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "slider" => FloatEditType::Slider,
            "input" => FloatEditType::Input,
            "drag" => FloatEditType::Drag,
            "knob" => FloatEditType::Knob,
            "slider_float_any_range" => FloatEditType::SliderFloatAnyRange,
            "slider_float_any_range_positive" => FloatEditType::SliderFloatAnyRangePositive,
            _ => return None,
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum BoolEditType {
    #[default]
    Checkbox,
    Toggle,
}

fn numeric_attrs(
    range: AttrValue,
    edit_types: &'static [&'static str],
    format: &'static str,
    knob_no_input: bool,
) -> Vec<PossibleAttr> {
    vec![
        PossibleAttr::new(
            "range",
            range.attr_type(),
            "range of the slider or knob; setting it switches the edit type to slider",
        )
        .with_default(range),
        PossibleAttr::new("edit_type", AttrType::Str, "widget used to edit the value")
            .with_default("input")
            .with_choices(edit_types),
        PossibleAttr::new("format", AttrType::Str, "printf-style display format")
            .with_default(format),
        PossibleAttr::new("width_em", AttrType::Float, "widget width in em").with_default(9.0),
        PossibleAttr::new("knob_size_em", AttrType::Float, "knob diameter in em")
            .with_default(2.5),
        PossibleAttr::new("knob_steps", AttrType::Int, "number of knob steps").with_default(10_i64),
        PossibleAttr::new("knob_no_input", AttrType::Bool, "hide the text input next to the knob")
            .with_default(knob_no_input),
        PossibleAttr::new("slider_no_input", AttrType::Bool, "hide the text input next to the slider")
            .with_default(false),
        PossibleAttr::new("slider_logarithmic", AttrType::Bool, "logarithmic slider scale")
            .with_default(false),
    ]
}

#[derive(Clone, Debug, PartialEq)]
pub struct IntParams {
    pub range: (i64, i64),
    pub edit_type: IntEditType,
    pub format: String,
    pub width_em: f64,
    pub knob_size_em: f64,
    pub knob_steps: i64,
    pub knob_no_input: bool,
    pub slider_no_input: bool,
    pub slider_logarithmic: bool,
}

impl Default for IntParams {
    fn default() -> Self {
        IntParams {
            range: (0, 100),
            edit_type: IntEditType::Input,
            format: "%d".to_string(),
            width_em: 9.0,
            knob_size_em: 2.5,
            knob_steps: 10,
            knob_no_input: true,
            slider_no_input: false,
            slider_logarithmic: false,
        }
    }
}

impl IntParams {
    pub fn possible_attrs() -> Vec<PossibleAttr> {
        numeric_attrs(AttrValue::IntRange(0, 100), INT_EDIT_TYPES, "%d", true)
    }

    /// Apply already validated attributes.
    pub fn apply(&mut self, attrs: &FiatAttributes) {
        if let Some(AttrValue::IntRange(lo, hi)) = attrs.get("range") {
            self.range = (*lo, *hi);
            self.edit_type = IntEditType::Slider;
        }
        if let Some(kind) = attrs.get_str("edit_type").and_then(IntEditType::parse) {
            self.edit_type = kind;
        }
        if let Some(format) = attrs.get_str("format") {
            self.format = format.to_string();
        }
        apply_numeric_common(
            attrs,
            &mut self.width_em,
            &mut self.knob_size_em,
            &mut self.knob_steps,
            &mut self.knob_no_input,
            &mut self.slider_no_input,
            &mut self.slider_logarithmic,
        );
    }

    pub fn format_value(&self, value: i64) -> String {
        format_printf(&self.format, |_| value.to_string())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FloatParams {
    pub range: (f64, f64),
    pub edit_type: FloatEditType,
    pub format: String,
    pub width_em: f64,
    pub knob_size_em: f64,
    pub knob_steps: i64,
    pub knob_no_input: bool,
    pub slider_no_input: bool,
    pub slider_logarithmic: bool,
}

impl Default for FloatParams {
    fn default() -> Self {
        FloatParams {
            range: (0.0, 10.0),
            edit_type: FloatEditType::Input,
            format: "%.3f".to_string(),
            width_em: 9.0,
            knob_size_em: 2.5,
            knob_steps: 10,
            knob_no_input: false,
            slider_no_input: false,
            slider_logarithmic: false,
        }
    }
}

impl FloatParams {
    pub fn possible_attrs() -> Vec<PossibleAttr> {
        numeric_attrs(AttrValue::FloatRange(0.0, 10.0), FLOAT_EDIT_TYPES, "%.3f", false)
    }

    pub fn apply(&mut self, attrs: &FiatAttributes) {
        if let Some(AttrValue::FloatRange(lo, hi)) = attrs.get("range") {
            self.range = (*lo, *hi);
            self.edit_type = FloatEditType::Slider;
        }
        if let Some(kind) = attrs.get_str("edit_type").and_then(FloatEditType::parse) {
            self.edit_type = kind;
        }
        match attrs.get_str("format") {
            Some(format) => self.format = format.to_string(),
            None if self.edit_type == FloatEditType::Knob => self.format = "%.2f".to_string(),
            None => {}
        }
        apply_numeric_common(
            attrs,
            &mut self.width_em,
            &mut self.knob_size_em,
            &mut self.knob_steps,
            &mut self.knob_no_input,
            &mut self.slider_no_input,
            &mut self.slider_logarithmic,
        );
    }

    pub fn format_value(&self, value: f64) -> String {
        format_printf(&self.format, |precision| match precision {
            Some(p) => format!("{value:.p$}"),
            None => value.to_string(),
        })
    }
}

fn apply_numeric_common(
    attrs: &FiatAttributes,
    width_em: &mut f64,
    knob_size_em: &mut f64,
    knob_steps: &mut i64,
    knob_no_input: &mut bool,
    slider_no_input: &mut bool,
    slider_logarithmic: &mut bool,
) {
    if let Some(v) = attrs.get_float("width_em") {
        *width_em = v;
    }
    if let Some(v) = attrs.get_float("knob_size_em") {
        *knob_size_em = v;
    }
    if let Some(v) = attrs.get_int("knob_steps") {
        *knob_steps = v;
    }
    if let Some(v) = attrs.get_bool("knob_no_input") {
        *knob_no_input = v;
    }
    if let Some(v) = attrs.get_bool("slider_no_input") {
        *slider_no_input = v;
    }
    if let Some(v) = attrs.get_bool("slider_logarithmic") {
        *slider_logarithmic = v;
    }
}

/// Substitute the first `%d`, `%f` or `%.Nf` directive of `format`.
fn format_printf(format: &str, render: impl Fn(Option<usize>) -> String) -> String {
    let Some(start) = format.find('%') else {
        return format.to_string();
    };
    let rest = &format[start + 1..];
    let (precision, consumed) = match rest.strip_prefix('.') {
        Some(after_dot) => {
            let digits: String = after_dot.chars().take_while(char::is_ascii_digit).collect();
            (digits.parse().ok(), 1 + digits.len())
        }
        None => (None, 0),
    };
    let directive = rest[consumed..].chars().next();
    match directive {
        Some('d') | Some('f') | Some('g') => {
            let end = start + 1 + consumed + 1;
            format!("{}{}{}", &format[..start], render(precision), &format[end..])
        }
        _ => format.to_string(),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BoolParams {
    pub edit_type: BoolEditType,
}

impl BoolParams {
    pub fn possible_attrs() -> Vec<PossibleAttr> {
        vec![
            PossibleAttr::new("edit_type", AttrType::Str, "checkbox or toggle switch")
                .with_default("checkbox")
                .with_choices(BOOL_EDIT_TYPES),
        ]
    }

    pub fn apply(&mut self, attrs: &FiatAttributes) {
        match attrs.get_str("edit_type") {
            Some("toggle") => self.edit_type = BoolEditType::Toggle,
            Some("checkbox") => self.edit_type = BoolEditType::Checkbox,
            _ => {}
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StrParams {
    pub width_em: f64,
    pub allow_multiline_edit: bool,
    pub size_multiline_em: (f64, f64),
    pub hint: String,
}

impl Default for StrParams {
    fn default() -> Self {
        StrParams {
            width_em: 15.0,
            allow_multiline_edit: false,
            size_multiline_em: (50.0, 15.0),
            hint: String::new(),
        }
    }
}

impl StrParams {
    pub fn possible_attrs() -> Vec<PossibleAttr> {
        vec![
            PossibleAttr::new("width_em", AttrType::Float, "input width in em").with_default(15.0),
            PossibleAttr::new("allow_multiline_edit", AttrType::Bool, "offer a multiline editor")
                .with_default(false),
            PossibleAttr::new("size_multiline_em", AttrType::FloatPair, "multiline editor size in em")
                .with_default(AttrValue::FloatPair(50.0, 15.0)),
            PossibleAttr::new("hint", AttrType::Str, "placeholder shown when empty")
                .with_default(""),
        ]
    }

    pub fn apply(&mut self, attrs: &FiatAttributes) {
        if let Some(v) = attrs.get_float("width_em") {
            self.width_em = v;
        }
        if let Some(v) = attrs.get_bool("allow_multiline_edit") {
            self.allow_multiline_edit = v;
        }
        if let Some(AttrValue::FloatPair(w, h)) = attrs.get("size_multiline_em") {
            self.size_multiline_em = (*w, *h);
        }
        if let Some(v) = attrs.get_str("hint") {
            self.hint = v.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_a_range_switches_to_slider() {
        let mut params = IntParams::default();
        params.apply(&FiatAttributes::new().with("range", (0_i64, 10_i64)));
        assert_eq!(params.range, (0, 10));
        assert_eq!(params.edit_type, IntEditType::Slider);

        let mut explicit = IntParams::default();
        explicit.apply(
            &FiatAttributes::new()
                .with("range", (0_i64, 10_i64))
                .with("edit_type", "knob"),
        );
        assert_eq!(explicit.edit_type, IntEditType::Knob);
    }

    #[test]
    fn knob_floats_default_to_two_decimals() {
        let mut params = FloatParams::default();
        params.apply(&FiatAttributes::new().with("edit_type", "knob"));
        assert_eq!(params.format, "%.2f");
        assert_eq!(params.format_value(1.23456), "1.23");
        assert_eq!(FloatParams::default().format_value(2.0), "2.000");
    }

    #[test]
    fn printf_keeps_surrounding_text() {
        let mut params = IntParams::default();
        params.apply(&FiatAttributes::new().with("format", "%d px"));
        assert_eq!(params.format_value(12), "12 px");
    }
}
