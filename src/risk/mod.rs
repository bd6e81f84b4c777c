//! Shell command risk classification.
//!
//! [`RiskAssessor::assess`] is a pure function of the command text and the workspace root.
//! Categories are decided in priority order: workspace boundary, restricted (network fetch,
//! installs, remote execution), destructive, allowed. Destructive patterns force strict
//! approval whatever the category.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::workspace;

/// Classification label driving approval strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RiskCategory {
    WorkspaceBoundary,
    Restricted,
    Destructive,
    Allowed,
}

/// Result of assessing one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub requires_approval: bool,
    pub reasons: Vec<String>,
    pub strict_approval: bool,
    pub risk_category: RiskCategory,
}

impl RiskAssessment {
    fn allowed() -> Self {
        Self {
            requires_approval: false,
            reasons: Vec::new(),
            strict_approval: false,
            risk_category: RiskCategory::Allowed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    Destructive,
    Restricted,
}

struct Rule {
    pattern: Regex,
    reason: &'static str,
    kind: RuleKind,
}

fn rule(pattern: &str, reason: &'static str, kind: RuleKind) -> Rule {
    Rule {
        pattern: Regex::new(pattern).expect("risk rule regex must compile"),
        reason,
        kind,
    }
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    use RuleKind::{Destructive, Restricted};
    vec![
        rule(r"\brm\s+(?:-\S+\s+)*-(?:rf|fr)\b", "recursive force delete detected", Destructive),
        rule(r"(?:^|[;&|])\s*(?:sudo\s+)?rm\s+\S", "file delete command detected", Destructive),
        rule(r"\brm\b.*\s-[a-z]*r[a-z]*\b", "recursive delete command detected", Destructive),
        rule(
            r"(?:^|[;&|])\s*(?:cmd\s+/c\s+)?(?:del|erase)\s+\S",
            "windows file delete command detected",
            Destructive,
        ),
        rule(
            r"\b(?:del|erase)\b.*(?:/s|/q|/f)",
            "windows recursive/force delete detected",
            Destructive,
        ),
        rule(
            r"(?:^|[;&|])\s*(?:powershell(?:\.exe)?\s+-command\s+)?(?:remove-item|ri)\s+\S",
            "powershell file delete command detected",
            Destructive,
        ),
        rule(r"\b(?:rmdir|rd)\b.*(?:/s|/q|-r)", "directory tree delete detected", Destructive),
        rule(
            r"\b(?:remove-item|ri)\b.*(?:-recurse|/s)",
            "powershell recursive delete detected",
            Destructive,
        ),
        rule(
            r"\b(?:remove-item|ri)\b.*(?:-force|/f)",
            "powershell force delete detected",
            Destructive,
        ),
        rule(r"(?:^|[;&|])\s*(?:sudo\s+)?mv\s+\S", "move/rename command detected", Destructive),
        rule(
            r"(?:^|[;&|])\s*(?:cmd\s+/c\s+)?(?:move|ren|rename)\s+\S",
            "windows move/rename command detected",
            Destructive,
        ),
        rule(r"\brename-item\b", "powershell move/rename command detected", Destructive),
        rule(r"\bgit\s+mv\b", "git move/rename detected", Destructive),
        rule(r"\bfind\b.*\s-delete\b", "find -delete sweep detected", Destructive),
        rule(
            r"\bfind\b.*\s-exec\b.*\b(?:rm|unlink|shred)\b",
            "find -exec destructive command detected",
            Destructive,
        ),
        rule(
            r"\bgit\s+(?:reset\s+--hard|clean\s+-[a-z]*f)",
            "destructive git cleanup/reset detected",
            Destructive,
        ),
        rule(
            r"\bgit\s+(?:checkout|restore)\b.*\s--(?:\s|$)",
            "git checkout/restore destructive target detected",
            Destructive,
        ),
        rule(
            r"(?:^|[;&|])\s*(?:sudo\s+)?(?:format|mkfs(?:\.\w+)?|fdisk|diskpart|parted|wipefs)\b",
            "disk formatting/partition command detected",
            Destructive,
        ),
        rule(
            r"\bdd\b.*\bof=(?:/dev/|\\\\\.\\physicaldrive)",
            "raw disk write command detected",
            Destructive,
        ),
        rule(
            r"(?:^|[;&|])\s*(?:sudo\s+)?(?:shutdown|reboot|poweroff|halt)\b",
            "system shutdown/reboot command detected",
            Destructive,
        ),
        rule(r":\(\)\s*\{\s*:\|:&\s*\};\s*:", "fork-bomb pattern detected", Destructive),
        rule(
            r"\b(?:chmod|chown|icacls|takeown)\b.*\s-[a-z]*r[a-z]*\b",
            "recursive permission/ownership change detected",
            Restricted,
        ),
        rule(
            r"\b(?:curl|wget|invoke-webrequest|iwr)\b.*\|\s*(?:sh|bash|zsh|cmd|powershell|pwsh)\b",
            "remote script pipe execution detected",
            Restricted,
        ),
        rule(
            r"\b(?:winget|choco|chocolatey|scoop|apt|apt-get|yum|dnf|zypper|pacman|brew|port|pip|pip3|npm|pnpm|yarn|gem|cargo|go)\s+(?:-\S+\s+)*(?:install|add|upgrade|update)\b",
            "software/package installation detected (explicit user consent required)",
            Restricted,
        ),
        rule(
            r"\b(?:sdk|jabba|asdf)\b.*\binstall\b",
            "runtime/toolchain installation detected (explicit user consent required)",
            Restricted,
        ),
        rule(
            r"\bgit\s+clone\b",
            "repository download/clone detected (explicit user consent required)",
            Restricted,
        ),
        rule(
            r"\b(?:curl|wget|invoke-webrequest|iwr|start-bitstransfer|bitsadmin)\b.*(?:https?://|ftp://)",
            "network download command detected (explicit user consent required)",
            Restricted,
        ),
    ]
});

static PARENT_TRAVERSAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[;&|])\s*(?:cd|pushd|set-location)\s+\.\.(?:[\\/][^;&|\s]+)*")
        .expect("parent traversal regex must compile")
});

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([^"]+)"|'([^']+)'|(\S+)"#).expect("token regex must compile")
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex must compile"));

const PARENT_TRAVERSAL_REASON: &str = "parent-directory traversal detected (may escape workspace)";
const MAX_OUTSIDE_PATH_REASONS: usize = 3;

const SHELL_WRAPPERS: &[&str] = &[
    "bash",
    "sh",
    "zsh",
    "fish",
    "cmd",
    "cmd.exe",
    "powershell",
    "powershell.exe",
    "pwsh",
    "pwsh.exe",
    "-c",
    "-lc",
    "/c",
    "-command",
    "-noprofile",
    "-noninteractive",
];

const DEVICE_PATHS: &[&str] = &["/dev/null", "/dev/stdout", "/dev/stderr", "/dev/stdin"];

/// Classifies shell commands before execution.
#[derive(Debug, Clone)]
pub struct RiskAssessor {
    home: Option<PathBuf>,
}

impl Default for RiskAssessor {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskAssessor {
    pub fn new() -> Self {
        Self {
            home: directories::UserDirs::new().map(|dirs| dirs.home_dir().to_path_buf()),
        }
    }

    /// Override the directory `~` expands to.
    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    pub fn assess(&self, command: &str, workspace_root: &str) -> RiskAssessment {
        if command.trim().is_empty() {
            return RiskAssessment::allowed();
        }

        let normalized = WHITESPACE
            .replace_all(&command.to_lowercase(), " ")
            .trim()
            .to_string();

        let mut reasons = Vec::new();
        let mut destructive = false;
        let mut restricted = false;
        for rule in RULES.iter() {
            if rule.pattern.is_match(&normalized) {
                push_unique(&mut reasons, rule.reason.to_string());
                match rule.kind {
                    RuleKind::Destructive => destructive = true,
                    RuleKind::Restricted => restricted = true,
                }
            }
        }

        let boundary = self.boundary_reasons(command, &normalized, workspace_root);
        if !boundary.is_empty() {
            for reason in boundary {
                push_unique(&mut reasons, reason);
            }
            return RiskAssessment {
                requires_approval: true,
                reasons,
                strict_approval: true,
                risk_category: RiskCategory::WorkspaceBoundary,
            };
        }

        let risk_category = if restricted {
            RiskCategory::Restricted
        } else if destructive {
            RiskCategory::Destructive
        } else {
            return RiskAssessment::allowed();
        };
        RiskAssessment {
            requires_approval: true,
            reasons,
            strict_approval: destructive,
            risk_category,
        }
    }

    fn boundary_reasons(
        &self,
        command: &str,
        normalized: &str,
        workspace_root: &str,
    ) -> Vec<String> {
        let mut reasons = Vec::new();
        if PARENT_TRAVERSAL.is_match(normalized) {
            reasons.push(PARENT_TRAVERSAL_REASON.to_string());
        }

        let candidates = self.absolute_path_candidates(command);
        if candidates.is_empty() {
            return reasons;
        }

        let root_key = if workspace_root.trim().is_empty() {
            None
        } else {
            Some(workspace::scope_key(workspace_root)).filter(|key| key_depth(key) >= 2)
        };

        let mut flagged = 0;
        for candidate in candidates {
            let key = workspace::scope_key(&candidate);
            let reason = match &root_key {
                Some(root) => {
                    let inside = key == *root
                        || (key.starts_with(root.as_str())
                            && key.as_bytes().get(root.len()) == Some(&b'/'));
                    (!inside)
                        .then(|| format!("outside-workspace path access detected: {candidate}"))
                }
                None => (key_depth(&key) <= 1).then(|| {
                    format!(
                        "system-level path access detected (no workspace boundary configured): {candidate}"
                    )
                }),
            };
            if let Some(reason) = reason {
                push_unique(&mut reasons, reason);
                flagged += 1;
                if flagged >= MAX_OUTSIDE_PATH_REASONS {
                    break;
                }
            }
        }
        reasons
    }

    fn absolute_path_candidates(&self, command: &str) -> Vec<String> {
        let mut out = Vec::new();
        for token in tokens(command) {
            self.collect_candidate(&mut out, &token);
        }
        out
    }

    fn collect_candidate(&self, out: &mut Vec<String>, raw: &str) {
        let token = self.sanitize_path_token(raw);
        if token.is_empty() {
            return;
        }
        if token.contains(char::is_whitespace) {
            for sub in token.split_whitespace().filter(|s| s.len() > 1) {
                self.collect_candidate(out, sub);
            }
            return;
        }
        if let Some(eq) = token.find('=') {
            if eq > 0 && eq + 1 < token.len() {
                self.collect_candidate(out, &token[eq + 1..]);
            }
        }
        if token.contains("://") || DEVICE_PATHS.contains(&token.as_str()) {
            return;
        }
        if is_absolute_like(&token) && !out.contains(&token) {
            out.push(token);
        }
    }

    fn sanitize_path_token(&self, raw: &str) -> String {
        let mut token = raw
            .trim()
            .trim_start_matches(['(', '[', '{'])
            .trim_end_matches([')', ']', '}', ',', ';', '|', '&'])
            .trim()
            .to_string();
        if let Some(stripped) = token.strip_prefix("file://") {
            token = stripped.to_string();
        }
        if let (Some(rest), Some(home)) = (token.strip_prefix("~/"), self.home.as_ref()) {
            token = home.join(rest).to_string_lossy().into_owned();
        }
        token
    }
}

/// First real executable of a command, past `sudo`, `env`, shell wrappers and flags.
///
/// `bash -lc "git status"` yields `git`.
pub fn extract_command_family(command: &str) -> String {
    for token in tokens(command) {
        for word in token.split_whitespace() {
            if word.contains('=') {
                continue;
            }
            let family = normalize_command_family(word);
            if family.is_empty()
                || family == "sudo"
                || family == "env"
                || family.starts_with('-')
                || SHELL_WRAPPERS.contains(&family.as_str())
            {
                continue;
            }
            return family;
        }
    }
    String::new()
}

/// Lowercase basename without `.exe`/`.cmd`/`.bat`, restricted to `[a-z0-9._-]`.
pub fn normalize_command_family(raw: &str) -> String {
    let token = raw.trim().replace(['"', '\''], "");
    let base = match token.rfind(['/', '\\']) {
        Some(idx) if idx + 1 < token.len() => &token[idx + 1..],
        _ => token.as_str(),
    };
    let mut lower = base.to_lowercase();
    for suffix in [".exe", ".cmd", ".bat"] {
        if let Some(stripped) = lower.strip_suffix(suffix) {
            lower = stripped.to_string();
            break;
        }
    }
    lower
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
        .collect()
}

fn tokens(command: &str) -> Vec<String> {
    TOKEN
        .captures_iter(command)
        .filter_map(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().trim().to_string())
        })
        .filter(|t| !t.is_empty())
        .collect()
}

fn is_absolute_like(token: &str) -> bool {
    let bytes = token.as_bytes();
    token.starts_with('/')
        || token.starts_with("\\\\")
        || (bytes.len() >= 3
            && bytes[0].is_ascii_alphabetic()
            && bytes[1] == b':'
            && (bytes[2] == b'/' || bytes[2] == b'\\'))
}

fn key_depth(key: &str) -> usize {
    key.split('/')
        .filter(|segment| !segment.is_empty() && !segment.ends_with(':'))
        .count()
}

fn push_unique(reasons: &mut Vec<String>, reason: String) {
    if !reasons.contains(&reason) {
        reasons.push(reason);
    }
}
