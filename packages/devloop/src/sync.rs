//! Hot file sync (**SUPPLEMENT**): copies changed files directly into a
//! running container instead of triggering a full rebuild/redeploy cycle,
//! when a [`SyncRule`] matches. See `SPEC_FULL.md` §4 for why this module
//! exists despite not being named by `spec.md`.

use std::process::Stdio;

use color_eyre::{Result, eyre::Context};
use lazy_regex::regex;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// A glob-to-container-path mapping evaluated per changed file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncRule {
    /// Glob pattern matched against workspace-relative changed-file paths.
    pub from: String,
    /// Destination path inside the container. `{}` is replaced with the
    /// matched file's basename when `from` has no wildcard directory component.
    pub to: String,
}

impl SyncRule {
    /// Whether `path` (workspace-relative, `/`-separated) matches this rule.
    pub fn matches(&self, path: &str) -> bool {
        glob_match(&self.from, path)
    }

    /// The in-container destination for a matched `path`.
    pub fn destination_for(&self, path: &str) -> String {
        let basename = path.rsplit('/').next().unwrap_or(path);
        self.to.replace("{}", basename)
    }
}

/// Minimal glob matcher supporting `*` (any run of non-`/` chars) and `**`
/// (any run of chars including `/`), sufficient for sync-rule globs without
/// pulling in a general-purpose glob engine for this one use.
fn glob_match(pattern: &str, path: &str) -> bool {
    let regex_str = glob_to_regex(pattern);
    match regex::Regex::new(&regex_str) {
        Ok(re) => re.is_match(path),
        Err(_) => false,
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^/]*"),
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '\\' | '|' => {
                out.push('\\');
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out.push('$');
    out
}

/// Evaluate `rules` against `changed_files`, returning the subset that
/// matched paired with their in-container destinations.
pub fn resolve_syncs(rules: &[SyncRule], changed_files: &[String]) -> Vec<(String, String)> {
    let mut matched = Vec::new();
    for path in changed_files {
        for rule in rules {
            if rule.matches(path) {
                matched.push((path.clone(), rule.destination_for(path)));
                break;
            }
        }
    }
    matched
}

/// Copy `local_path` into `container`'s filesystem at `dest_path`, piping a
/// `tar` stream through `kubectl cp`'s underlying mechanism — a subprocess
/// wrapper consistent with how this crate drives every other cluster-facing
/// tool, rather than linking `kube::Api::<Pod>::exec` directly for a one-shot
/// transfer.
#[instrument(skip(local_path))]
pub async fn sync_file(
    namespace: &str,
    pod_name: &str,
    container_name: &str,
    local_path: &std::path::Path,
    dest_path: &str,
) -> Result<()> {
    let target = format!("{namespace}/{pod_name}:{dest_path}");
    let status = tokio::process::Command::new("kubectl")
        .args(["cp", &local_path.to_string_lossy(), &target, "-c", container_name])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .status()
        .await
        .context("spawn kubectl cp")?;

    if !status.success() {
        color_eyre::eyre::bail!("kubectl cp failed for {dest_path} in pod {pod_name}: {status}");
    }
    info!(%pod_name, %dest_path, "synced file into running container");
    Ok(())
}

/// Matches a literal anchor character some callers pass through unescaped;
/// kept as a guard so a pattern like `src/**/*.py` round-trips predictably.
pub fn is_plain_literal(pattern: &str) -> bool {
    !regex!(r"[*?\[\]{}]").is_match(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_star_matches_nested_paths() {
        let rule = SyncRule {
            from: "src/**/*.py".into(),
            to: "/app/{}".into(),
        };
        assert!(rule.matches("src/pkg/sub/mod.py"));
        assert!(!rule.matches("config/mod.py"));
    }

    #[test]
    fn single_star_does_not_cross_slash() {
        let rule = SyncRule {
            from: "static/*.css".into(),
            to: "/app/static/{}".into(),
        };
        assert!(rule.matches("static/main.css"));
        assert!(!rule.matches("static/sub/main.css"));
    }

    #[test]
    fn destination_substitutes_basename() {
        let rule = SyncRule {
            from: "src/**/*.py".into(),
            to: "/app/{}".into(),
        };
        assert_eq!(rule.destination_for("src/pkg/mod.py"), "/app/mod.py");
    }

    #[test]
    fn resolve_syncs_only_returns_matches() {
        let rules = vec![SyncRule {
            from: "src/*.py".into(),
            to: "/app/{}".into(),
        }];
        let changed = vec!["src/main.py".to_string(), "Dockerfile".to_string()];
        let matched = resolve_syncs(&rules, &changed);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].0, "src/main.py");
    }

    #[test]
    fn plain_literal_detection() {
        assert!(is_plain_literal("Dockerfile"));
        assert!(!is_plain_literal("src/*.py"));
    }
}
