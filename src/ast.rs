use std::path::PathBuf;

/// One program within a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    pub program: String,
    /// Arguments after the program name (`argv[1..]`).
    pub args: Vec<String>,
}

/// A parsed command line: stages joined by `|`, boundary redirections and
/// the background flag.
///
/// Always holds at least one stage. Redirections only ever apply at the
/// pipeline boundary: `input_path` feeds the first stage, `output_path` and
/// `error_path` belong to the last one. The parser rejects anything else.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSpec {
    pub stages: Vec<StageSpec>,
    pub input_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub error_path: Option<PathBuf>,
    pub background: bool,
}

impl PipelineSpec {
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True when the line names exactly one stage and no redirections, the
    /// only shape a builtin is dispatched for.
    pub fn is_simple(&self) -> bool {
        self.stages.len() == 1
            && self.input_path.is_none()
            && self.output_path.is_none()
            && self.error_path.is_none()
    }
}
