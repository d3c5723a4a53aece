//! Client-side runtimes inlined into rendered pages.

use std::{io::ErrorKind, path::Path, sync::Arc};

use tracing::{info, warn};

use super::error::InfraError;

const CHART_RUNTIME_FILE: &str = "vchart.js";
const KATEX_STYLESHEET_FILE: &str = "katex.min.css";

/// Scripts and stylesheets loaded once at startup and shared by the strategies.
#[derive(Debug, Clone, Default)]
pub struct AssetLibrary {
    chart_runtime: Option<Arc<str>>,
    katex_stylesheet: Option<Arc<str>>,
}

impl AssetLibrary {
    pub fn new(chart_runtime: Option<String>, katex_stylesheet: Option<String>) -> Self {
        Self {
            chart_runtime: chart_runtime.map(Arc::from),
            katex_stylesheet: katex_stylesheet.map(Arc::from),
        }
    }

    /// Load assets from `dir`. Missing files are logged and left empty; strategies that
    /// need them fail per task.
    pub async fn load(dir: &Path) -> Result<Self, InfraError> {
        let chart_runtime = read_optional(dir, CHART_RUNTIME_FILE).await?;
        if chart_runtime.is_none() {
            warn!(
                target = "courseviz::assets",
                dir = %dir.display(),
                file = CHART_RUNTIME_FILE,
                "chart runtime missing; chart tasks will fail"
            );
        }

        let katex_stylesheet = read_optional(dir, KATEX_STYLESHEET_FILE).await?;
        if katex_stylesheet.is_none() {
            warn!(
                target = "courseviz::assets",
                dir = %dir.display(),
                file = KATEX_STYLESHEET_FILE,
                "KaTeX stylesheet missing; formulas render with fallback fonts"
            );
        }

        info!(
            target = "courseviz::assets",
            dir = %dir.display(),
            chart_runtime = chart_runtime.is_some(),
            katex_stylesheet = katex_stylesheet.is_some(),
            "render assets loaded"
        );
        Ok(Self::new(chart_runtime, katex_stylesheet))
    }

    pub fn chart_runtime(&self) -> Option<&str> {
        self.chart_runtime.as_deref()
    }

    pub fn katex_stylesheet(&self) -> &str {
        self.katex_stylesheet.as_deref().unwrap_or_default()
    }
}

async fn read_optional(dir: &Path, name: &str) -> Result<Option<String>, InfraError> {
    match tokio::fs::read_to_string(dir.join(name)).await {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(InfraError::Io(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_files_are_tolerated() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join(CHART_RUNTIME_FILE), "window.VChart = {};")
            .expect("write runtime");

        let assets = AssetLibrary::load(dir.path()).await.expect("assets");
        assert_eq!(assets.chart_runtime(), Some("window.VChart = {};"));
        assert_eq!(assets.katex_stylesheet(), "");
    }
}
