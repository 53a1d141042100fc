//! Declarative YAML case files

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::driver::Expectation;
use crate::error::{E2eError, E2eResult};

/// One case parsed from a YAML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSpec {
    /// Name, unique within its file
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering, e.g. `smoke` or `regression`
    #[serde(default)]
    pub tags: Vec<String>,

    /// Skip reason; a present value skips the case at setup
    #[serde(default)]
    pub skip: Option<String>,

    /// Steps to execute in order
    pub steps: Vec<TestStep>,

    /// Spec file path relative to the specs directory
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// A single step in a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Navigate to a path relative to the base URL
    Navigate {
        #[serde(default)]
        url: String,
        #[serde(default)]
        wait_for_selector: Option<String>,
    },

    Reload,

    Click {
        selector: String,
    },

    Dblclick {
        selector: String,
    },

    Fill {
        selector: String,
        value: String,
    },

    /// Press a key while `selector` has focus
    Press {
        selector: String,
        key: String,
    },

    Check {
        selector: String,
    },

    Uncheck {
        selector: String,
    },

    Hover {
        selector: String,
    },

    /// Wait for an element to become visible
    Wait {
        selector: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Waiting assertion on an element
    Assert {
        selector: String,
        #[serde(default)]
        visible: Option<bool>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        count: Option<usize>,
        #[serde(default)]
        checked: Option<bool>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Wait until the URL ends with `suffix`
    AssertUrl {
        suffix: String,
    },

    /// Log a message (for debugging)
    Log {
        message: String,
    },
}

impl TestStep {
    /// Short label used in step results and failure messages
    pub fn label(&self) -> String {
        match self {
            TestStep::Navigate { url, .. } => format!("navigate {}", url),
            TestStep::Reload => "reload".to_string(),
            TestStep::Click { selector } => format!("click {}", selector),
            TestStep::Dblclick { selector } => format!("dblclick {}", selector),
            TestStep::Fill { selector, .. } => format!("fill {}", selector),
            TestStep::Press { selector, key } => format!("press {} on {}", key, selector),
            TestStep::Check { selector } => format!("check {}", selector),
            TestStep::Uncheck { selector } => format!("uncheck {}", selector),
            TestStep::Hover { selector } => format!("hover {}", selector),
            TestStep::Wait { selector, .. } => format!("wait {}", selector),
            TestStep::Assert { selector, .. } => format!("assert {}", selector),
            TestStep::AssertUrl { suffix } => format!("assert_url {}", suffix),
            TestStep::Log { .. } => "log".to_string(),
        }
    }

    /// Expectation of an `assert` step
    pub fn expectation(&self) -> Option<Expectation> {
        match self {
            TestStep::Assert {
                visible,
                text,
                count,
                checked,
                ..
            } => Some(Expectation {
                visible: *visible,
                text: text.clone(),
                count: *count,
                checked: *checked,
            }),
            _ => None,
        }
    }
}

impl TestSpec {
    /// Parse a spec from a YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let spec: Self = serde_yaml::from_str(yaml)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Parse a spec from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| match e {
            E2eError::Yaml(err) => E2eError::SpecParse(format!("{}: {}", path.display(), err)),
            E2eError::SpecParse(msg) => E2eError::SpecParse(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Load every `.yaml`/`.yml` under `dir`, ordered by path
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut specs = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            let mut spec = Self::from_file(entry.path())?;
            let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
            spec.source = Some(relative.to_path_buf());
            specs.push(spec);
        }

        Ok(specs)
    }

    /// `<relative spec path>::<name>`, with `/` separators on every platform
    pub fn test_id(&self) -> String {
        match &self.source {
            Some(path) => {
                let parts: Vec<String> = path
                    .components()
                    .filter_map(|c| match c {
                        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                        _ => None,
                    })
                    .collect();
                format!("{}::{}", parts.join("/"), self.name)
            }
            None => self.name.clone(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Keep specs carrying `tag` whose name contains `name`
    pub fn filter<'a>(specs: &'a [Self], tag: Option<&str>, name: Option<&str>) -> Vec<&'a Self> {
        specs
            .iter()
            .filter(|s| tag.map_or(true, |t| s.has_tag(t)))
            .filter(|s| name.map_or(true, |n| s.name.contains(n)))
            .collect()
    }

    fn validate(&self) -> E2eResult<()> {
        if self.name.trim().is_empty() {
            return Err(E2eError::SpecParse("case name is empty".into()));
        }
        for (index, step) in self.steps.iter().enumerate() {
            if let Some(expectation) = step.expectation() {
                if expectation.is_empty() {
                    return Err(E2eError::SpecParse(format!(
                        "step {} ({}) has nothing to assert",
                        index + 1,
                        step.label()
                    )));
                }
            }
        }
        Ok(())
    }
}
