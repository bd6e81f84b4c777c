//! Built-in coding tools.
//!
//! Read-only tools (`read`, `list`, `grep`) answer directly. Mutating tools (`write`, `edit`,
//! `delete`) only compute the proposed content and hand a [`ProposedChange`] to the dispatch
//! gate, which queues it for approval. `bash` returns a [`CommandRequest`] that the gate
//! risk-assesses before anything runs. Each tool is built with [`AgentTool::new`] and returned
//! as `Arc<dyn Tool>`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;

use crate::error::{Result, RikkiError};
use crate::pending::ChangeType;
use crate::tools::tool::{AgentTool, CommandRequest, ProposedChange, Tool, ToolAction};
use crate::tools::types::AgentToolParameters;
use crate::types::ToolCompletion;
use crate::util::text::{preview, truncate_utf8};
use crate::workspace;

const READ_MAX_BYTES: usize = 65_536;
const READ_DEFAULT_LIMIT: usize = 2_000;
const READ_LINE_MAX_BYTES: usize = 2_000;
const GREP_MAX_MATCHES: usize = 200;
const GREP_SKIP_DIRS: &[&str] = &["node_modules", "target", "build", "dist"];

const NOT_FOUND: &str = "oldString not found in content (exact or trimmed)";
const AMBIGUOUS: &str =
    "oldString found multiple times and requires more code context to uniquely identify the intended match";

/// Create the `read` tool: numbered lines of a file, honoring staged changes.
pub fn read_tool() -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "read",
        "Read a file from the workspace",
        AgentToolParameters::object()
            .string("filePath", "Path to the file to read", true)
            .integer("offset", "Line number to start reading from (0-based)", false)
            .integer("limit", "Number of lines to read (defaults to 2000)", false)
            .build(),
        |args, ctx| async move {
            let file_path = args.get_str("filePath")?;
            let (_, relative) = ctx.resolve(file_path)?;
            let content = ctx
                .current_content(file_path)
                .await?
                .ok_or_else(|| RikkiError::tool("read", format!("File not found: {relative}")))?;

            let offset = args.get_i64_opt("offset").unwrap_or(0).max(0) as usize;
            let limit = args
                .get_i64_opt("limit")
                .filter(|l| *l > 0)
                .map_or(READ_DEFAULT_LIMIT, |l| l as usize);

            let lines: Vec<&str> = content.lines().collect();
            let start = offset.min(lines.len());
            let end = start.saturating_add(limit).min(lines.len());
            let mut output = String::new();
            for (i, line) in lines[start..end].iter().enumerate() {
                output.push_str(&format!(
                    "{:>6}\t{}\n",
                    start + i + 1,
                    truncate_utf8(line, READ_LINE_MAX_BYTES)
                ));
            }
            if end < lines.len() {
                output.push_str(&format!(
                    "\n(File has more lines. Use 'offset' to read beyond line {end})"
                ));
            }

            Ok(ToolAction::Output(
                ToolCompletion::new(preview(&output, READ_MAX_BYTES))
                    .with_title(relative)
                    .with_meta("lines", lines.len()),
            ))
        },
    ))
}

/// Create the `list` tool: sorted directory entries, directories suffixed with `/`.
pub fn list_tool() -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "list",
        "List files and directories in a workspace directory",
        AgentToolParameters::object()
            .string("path", "Directory to list (defaults to the workspace root)", false)
            .build(),
        |args, ctx| async move {
            let dir = ctx.resolve_dir(args.get_str_opt("path"))?;
            let mut read_dir = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| RikkiError::tool("list", format!("{}: {e}", dir.display())))?;

            let mut entries = Vec::new();
            while let Some(entry) = read_dir
                .next_entry()
                .await
                .map_err(|e| RikkiError::tool("list", e.to_string()))?
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                let is_dir = entry
                    .file_type()
                    .await
                    .map(|t| t.is_dir())
                    .unwrap_or(false);
                entries.push(if is_dir { format!("{name}/") } else { name });
            }
            entries.sort();

            let count = entries.len();
            let output = if entries.is_empty() {
                "(empty directory)".to_string()
            } else {
                entries.join("\n")
            };
            Ok(ToolAction::Output(
                ToolCompletion::new(output)
                    .with_title(display_path(&ctx.workspace_root, &dir))
                    .with_meta("count", count),
            ))
        },
    ))
}

/// Create the `grep` tool: regex search over workspace files.
///
/// Hidden directories and common build output are skipped. At most 200 matches are reported.
pub fn grep_tool() -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "grep",
        "Search workspace files for a regular expression",
        AgentToolParameters::object()
            .string("pattern", "The regular expression to search for", true)
            .string(
                "path",
                "Directory or file to search in (defaults to the workspace root)",
                false,
            )
            .build(),
        |args, ctx| async move {
            let pattern = args.get_str("pattern")?;
            let regex = Regex::new(pattern)
                .map_err(|e| RikkiError::tool("grep", format!("Invalid pattern: {e}")))?;
            let target = ctx.resolve_dir(args.get_str_opt("path"))?;
            let root = workspace::root_path(&ctx.workspace_root)?;

            let matches = tokio::task::spawn_blocking(move || {
                let mut matches = Vec::new();
                grep_path(&root, &target, &regex, &mut matches);
                matches
            })
            .await
            .map_err(|e| RikkiError::tool("grep", e.to_string()))?;

            let count = matches.len();
            let mut output = if matches.is_empty() {
                "No matches found".to_string()
            } else {
                matches.join("\n")
            };
            if count >= GREP_MAX_MATCHES {
                output.push_str(&format!("\n(Results truncated at {GREP_MAX_MATCHES} matches)"));
            }
            Ok(ToolAction::Output(
                ToolCompletion::new(output)
                    .with_title(pattern.to_string())
                    .with_meta("matches", count),
            ))
        },
    ))
}

/// Create the `write` tool: stage the full content of a file.
pub fn write_tool() -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "write",
            "Write a file in the workspace. The change is staged for review.",
            AgentToolParameters::object()
                .string("filePath", "Path to the file to write", true)
                .string("content", "Full file content", true)
                .build(),
            |args, ctx| async move {
                let file_path = args.get_str("filePath")?;
                let content = args.get_str("content")?;
                let (_, relative) = ctx.resolve(file_path)?;
                let current = ctx.current_content(file_path).await?;
                let change_type = if current.is_some() {
                    ChangeType::Edit
                } else {
                    ChangeType::Create
                };
                Ok(ToolAction::ProposeChange(ProposedChange {
                    path: relative,
                    change_type,
                    old_content: current,
                    new_content: Some(content.to_string()),
                }))
            },
        )
        .with_path_argument("filePath"),
    )
}

/// Create the `edit` tool: exact string replacement on top of any staged content.
pub fn edit_tool() -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "edit",
            "Performs exact string replacements in files. The change is staged for review.",
            AgentToolParameters::object()
                .string("filePath", "Path to the file to modify", true)
                .string("oldString", "The text to replace (empty to create a new file)", false)
                .string("newString", "The text to replace it with", true)
                .boolean(
                    "replaceAll",
                    "Replace all occurrences of oldString (default false)",
                    false,
                )
                .build(),
            |args, ctx| async move {
                let file_path = args.get_str("filePath")?;
                let old = args.get_str_opt("oldString").unwrap_or_default();
                let new = args.get_str("newString")?;
                let replace_all = args.get_bool_opt("replaceAll").unwrap_or(false);
                let (_, relative) = ctx.resolve(file_path)?;

                let proposal = match ctx.current_content(file_path).await? {
                    None if !old.is_empty() => {
                        return Err(RikkiError::tool(
                            "edit",
                            format!(
                                "File {relative} not found. To create a new file, leave oldString empty."
                            ),
                        ));
                    }
                    None => ProposedChange {
                        path: relative,
                        change_type: ChangeType::Create,
                        old_content: None,
                        new_content: Some(new.to_string()),
                    },
                    Some(_) if old == new => {
                        return Err(RikkiError::tool(
                            "edit",
                            "oldString and newString must be different",
                        ));
                    }
                    Some(content) => {
                        let updated = replace_in(&content, old, new, replace_all)
                            .map_err(|message| RikkiError::tool("edit", message))?;
                        ProposedChange {
                            path: relative,
                            change_type: ChangeType::Edit,
                            old_content: Some(content),
                            new_content: Some(updated),
                        }
                    }
                };
                Ok(ToolAction::ProposeChange(proposal))
            },
        )
        .with_path_argument("filePath"),
    )
}

/// Create the `delete` tool: stage removal of a file.
pub fn delete_tool() -> Arc<dyn Tool> {
    Arc::new(
        AgentTool::new(
            "delete",
            "Delete a file from the workspace. The deletion is staged for review.",
            AgentToolParameters::object()
                .string("filePath", "Path to the file to delete", true)
                .build(),
            |args, ctx| async move {
                let file_path = args.get_str("filePath")?;
                let (_, relative) = ctx.resolve(file_path)?;
                let current = ctx.current_content(file_path).await?.ok_or_else(|| {
                    RikkiError::tool("delete", format!("File not found: {relative}"))
                })?;
                Ok(ToolAction::ProposeChange(ProposedChange {
                    path: relative,
                    change_type: ChangeType::Delete,
                    old_content: Some(current),
                    new_content: None,
                }))
            },
        )
        .with_path_argument("filePath"),
    )
}

/// Create the `bash` tool: request a shell command.
///
/// The command is risk-assessed by the dispatch gate and either runs or waits for approval.
pub fn bash_tool() -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "bash",
        "Run a shell command in the workspace",
        AgentToolParameters::object()
            .string("command", "The command to execute", true)
            .string("description", "Short description of what the command does", false)
            .string("workdir", "Working directory relative to the workspace root", false)
            .integer("timeout", "Timeout in milliseconds", false)
            .build(),
        |args, _ctx| async move {
            let command = args.get_str("command")?;
            if command.trim().is_empty() {
                return Err(RikkiError::tool("bash", "command must not be empty"));
            }
            Ok(ToolAction::RunCommand(CommandRequest {
                command: command.to_string(),
                description: args.get_str_opt("description").unwrap_or_default().to_string(),
                workdir: args.get_non_empty("workdir").map(str::to_string),
                timeout_ms: args
                    .get_i64_opt("timeout")
                    .filter(|t| *t > 0)
                    .map(|t| t as u64),
            }))
        },
    ))
}

/// Return all built-in tools.
pub fn all_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        read_tool(),
        list_tool(),
        grep_tool(),
        write_tool(),
        edit_tool(),
        delete_tool(),
        bash_tool(),
    ]
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Replace `old` with `new` in `content`.
///
/// Exact occurrences are preferred; failing that, a block of lines equal to `old` after
/// trimming each line matches.
pub(crate) fn replace_in(
    content: &str,
    old: &str,
    new: &str,
    replace_all: bool,
) -> std::result::Result<String, &'static str> {
    if old.is_empty() {
        return Err(NOT_FOUND);
    }
    let mut ranges: Vec<(usize, usize)> = content
        .match_indices(old)
        .map(|(start, m)| (start, start + m.len()))
        .collect();
    if ranges.is_empty() {
        ranges = line_block_matches(content, old);
    }
    match ranges.len() {
        0 => return Err(NOT_FOUND),
        1 => {}
        _ if !replace_all => return Err(AMBIGUOUS),
        _ => {}
    }

    let mut out = String::with_capacity(content.len() + new.len());
    let mut cursor = 0;
    for (start, end) in ranges {
        if start < cursor {
            continue;
        }
        out.push_str(&content[cursor..start]);
        out.push_str(new);
        cursor = end;
    }
    out.push_str(&content[cursor..]);
    Ok(out)
}

fn line_block_matches(content: &str, find: &str) -> Vec<(usize, usize)> {
    let mut search: Vec<&str> = find.split('\n').collect();
    if search.last().is_some_and(|l| l.is_empty()) {
        search.pop();
    }
    let lines: Vec<&str> = content.split('\n').collect();
    if search.is_empty() || lines.len() < search.len() {
        return Vec::new();
    }

    let mut starts = Vec::with_capacity(lines.len());
    let mut offset = 0;
    for line in &lines {
        starts.push(offset);
        offset += line.len() + 1;
    }

    (0..=lines.len() - search.len())
        .filter(|&i| {
            search
                .iter()
                .enumerate()
                .all(|(j, s)| lines[i + j].trim() == s.trim())
        })
        .map(|i| {
            let last = i + search.len() - 1;
            (starts[i], starts[last] + lines[last].len())
        })
        .collect()
}

fn grep_path(root: &Path, path: &Path, regex: &Regex, out: &mut Vec<String>) {
    if out.len() >= GREP_MAX_MATCHES {
        return;
    }
    if path.is_dir() {
        let Ok(read_dir) = std::fs::read_dir(path) else {
            return;
        };
        let mut children: Vec<PathBuf> =
            read_dir.filter_map(|e| e.ok().map(|e| e.path())).collect();
        children.sort();
        for child in children {
            let name = child
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if child.is_dir() && (name.starts_with('.') || GREP_SKIP_DIRS.contains(&name.as_str()))
            {
                continue;
            }
            grep_path(root, &child, regex, out);
        }
        return;
    }

    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };
    let relative = workspace::relative_to(root, path);
    for (index, line) in content.lines().enumerate() {
        if out.len() >= GREP_MAX_MATCHES {
            return;
        }
        if regex.is_match(line) {
            out.push(format!(
                "{relative}:{}: {}",
                index + 1,
                truncate_utf8(line.trim_end(), READ_LINE_MAX_BYTES)
            ));
        }
    }
}

fn display_path(workspace_root: &str, dir: &Path) -> String {
    match workspace::root_path(workspace_root) {
        Ok(root) if root == dir => ".".to_string(),
        Ok(root) => workspace::relative_to(&root, dir),
        Err(_) => dir.display().to_string(),
    }
}
