use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The closed set of chart tags a recommendation may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum VizType {
    #[serde(rename = "scatter")]
    Scatter,
    #[serde(rename = "bar")]
    Bar,
    #[serde(rename = "line")]
    Line,
    #[serde(rename = "histogram")]
    Histogram,
    #[serde(rename = "box")]
    BoxPlot,
    #[serde(rename = "heatmap")]
    Heatmap,
}

impl VizType {
    pub const ALL: [VizType; 6] = [
        VizType::Scatter,
        VizType::Bar,
        VizType::Line,
        VizType::Histogram,
        VizType::BoxPlot,
        VizType::Heatmap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VizType::Scatter => "scatter",
            VizType::Bar => "bar",
            VizType::Line => "line",
            VizType::Histogram => "histogram",
            VizType::BoxPlot => "box",
            VizType::Heatmap => "heatmap",
        }
    }

    /// Whether the x and y axes must be bound for this chart.
    pub fn required_axes(&self) -> (bool, bool) {
        match self {
            VizType::Scatter | VizType::Line | VizType::Bar | VizType::BoxPlot => (true, true),
            VizType::Histogram => (true, false),
            VizType::Heatmap => (false, false),
        }
    }

    pub fn tag_list() -> String {
        Self::ALL.iter().map(|v| v.as_str()).collect::<Vec<_>>().join("|")
    }
}

impl fmt::Display for VizType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVizType(pub String);

impl FromStr for VizType {
    type Err = UnknownVizType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scatter" | "scatter_plot" => Ok(VizType::Scatter),
            "bar" | "bar_chart" => Ok(VizType::Bar),
            "line" | "line_chart" => Ok(VizType::Line),
            "histogram" => Ok(VizType::Histogram),
            "box" | "box_plot" => Ok(VizType::BoxPlot),
            "heatmap" => Ok(VizType::Heatmap),
            _ => Err(UnknownVizType(s.to_string())),
        }
    }
}

/// Column bindings of one chart. Unbound axes are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisBindings {
    pub x_axis: Option<String>,
    pub y_axis: Option<String>,
    pub color: Option<String>,
    pub group_by: Option<String>,
}

impl AxisBindings {
    /// Every bound column with the name of the axis it is bound to.
    pub fn referenced(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("x_axis", &self.x_axis),
            ("y_axis", &self.y_axis),
            ("color", &self.color),
            ("group_by", &self.group_by),
        ]
        .into_iter()
        .filter_map(|(axis, column)| column.as_deref().map(|c| (axis, c)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualizationSpec {
    pub viz_type: VizType,
    pub title: String,
    #[serde(flatten)]
    pub bindings: AxisBindings,
    pub justification: String,
    pub best_practices: Vec<String>,
}

/// A validated recommendation. The array length is the cardinality contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub problem: String,
    pub analysis: String,
    pub visualizations: [VisualizationSpec; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessUnderstanding {
    pub business_context: String,
    pub hypotheses: Vec<String>,
    pub key_metrics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FigureInterpretation {
    pub performance_insights: Vec<String>,
    pub segment_analysis: Vec<String>,
    pub figure_findings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutiveSynthesis {
    pub executive_summary: String,
    pub recommendations: Vec<String>,
    pub risk_factors: Vec<String>,
    pub next_steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaffoldReport {
    pub problem: String,
    pub understanding: BusinessUnderstanding,
    pub interpretation: FigureInterpretation,
    pub synthesis: ExecutiveSynthesis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaffoldStage {
    Understanding,
    Interpretation,
    Synthesis,
}

impl ScaffoldStage {
    pub fn number(&self) -> u8 {
        match self {
            ScaffoldStage::Understanding => 1,
            ScaffoldStage::Interpretation => 2,
            ScaffoldStage::Synthesis => 3,
        }
    }
}

impl fmt::Display for ScaffoldStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScaffoldStage::Understanding => "business understanding",
            ScaffoldStage::Interpretation => "figure interpretation",
            ScaffoldStage::Synthesis => "executive synthesis",
        };
        write!(f, "step {} ({})", self.number(), label)
    }
}

/// Steps that completed before a scaffold chain aborted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PartialScaffold {
    pub understanding: Option<BusinessUnderstanding>,
    pub interpretation: Option<FigureInterpretation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub text: String,
    pub usage: TokenUsage,
}
