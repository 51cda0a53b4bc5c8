use std::path::Path;

use crate::db::models::{BuildConfig, FunctionRuntime};

/// Resolves `BuildConfig::Auto` against a checked-out working tree by file
/// presence, cheapest and most explicit signal first.
pub fn detect(root: &Path) -> BuildConfig {
    if root.join("Dockerfile").is_file() {
        return BuildConfig::Dockerfile {
            path: "Dockerfile".to_string(),
            context: ".".to_string(),
            build_args: Default::default(),
            target: None,
        };
    }

    if root.join("project.toml").is_file() {
        return BuildConfig::Buildpack { builder: "paketobuildpacks/builder-jammy-base".to_string() };
    }

    if root.join("go.mod").is_file() {
        return BuildConfig::Function { runtime: FunctionRuntime::Go, handler: "main".to_string() };
    }
    if root.join("Cargo.toml").is_file() {
        return BuildConfig::Function { runtime: FunctionRuntime::Rust, handler: "main".to_string() };
    }
    if root.join("requirements.txt").is_file() || root.join("pyproject.toml").is_file() {
        return BuildConfig::Function { runtime: FunctionRuntime::Python, handler: "app.handler".to_string() };
    }
    if root.join("package.json").is_file() {
        return BuildConfig::Function { runtime: FunctionRuntime::Node, handler: "index.handler".to_string() };
    }

    // No recognisable signal; fall back to buildpacks, which auto-detect the
    // language themselves.
    BuildConfig::Buildpack { builder: "paketobuildpacks/builder-jammy-base".to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn prefers_dockerfile_over_everything_else() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch").unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert!(matches!(detect(dir.path()), BuildConfig::Dockerfile { .. }));
    }

    #[test]
    fn detects_go_module() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("go.mod"), "module example.com/svc").unwrap();
        assert!(matches!(
            detect(dir.path()),
            BuildConfig::Function { runtime: FunctionRuntime::Go, .. }
        ));
    }

    #[test]
    fn falls_back_to_buildpacks_when_nothing_matches() {
        let dir = tempdir().unwrap();
        assert!(matches!(detect(dir.path()), BuildConfig::Buildpack { .. }));
    }
}
