use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use chrono::Local;
use tracing::info;

use crate::{
    ast::{ImportAlias, Stmt, StmtKind},
    diagnostics::{LotusError, Result},
    parser,
    result::ShellResult,
};

pub const EXPORT_EXTENSION: &str = "lotus";
const PREVIEW_LINES: usize = 20;

/// Renders `history` as a script that replays the session step by step.
pub fn render_script(history: &[ShellResult], include_errors: bool) -> String {
    if history.is_empty() {
        return "# No history to export\n".to_string();
    }

    let mut imports = BTreeSet::new();
    let mut steps = Vec::new();
    for (idx, result) in history.iter().enumerate() {
        if result.is_error() && !include_errors {
            continue;
        }
        if let Ok(module) = parser::parse_module(&result.code) {
            collect_imports(&module.items, &mut imports);
        }
        steps.push(format!("# Step {}", idx + 1));
        steps.push(result.code.clone());
        steps.push(String::new());
    }

    let mut parts = vec![
        "# Lotus Shell Session Export".to_string(),
        format!("# Generated: {}", Local::now().format("%Y-%m-%d %H:%M:%S")),
        String::new(),
    ];
    if !imports.is_empty() {
        parts.extend(imports);
        parts.push(String::new());
    }
    parts.extend(steps);
    parts.join("\n")
}

/// Writes the rendered script below `dir` and returns a confirmation with
/// a short preview.
pub fn write_script(
    dir: &Path,
    filename: &str,
    history: &[ShellResult],
    include_errors: bool,
) -> Result<String> {
    let requested = Path::new(filename);
    if requested.is_absolute() {
        return Err(LotusError::AbsoluteExportPath(requested.to_path_buf()));
    }
    let filename = with_extension(filename);
    let path: PathBuf = dir.join(&filename);

    let script = render_script(history, include_errors);
    fs::write(&path, &script)?;
    info!(path = %path.display(), "exported history");

    let lines: Vec<&str> = script.split('\n').collect();
    let mut preview = lines
        .iter()
        .take(PREVIEW_LINES)
        .copied()
        .collect::<Vec<_>>()
        .join("\n");
    if lines.len() > PREVIEW_LINES {
        preview.push_str(&format!("\n... ({} more lines)", lines.len() - PREVIEW_LINES));
    }
    Ok(format!(
        "Exported {} lines to {filename}\n\n{preview}",
        lines.len()
    ))
}

fn with_extension(filename: &str) -> String {
    let suffix = format!(".{EXPORT_EXTENSION}");
    if filename.ends_with(&suffix) {
        filename.to_string()
    } else {
        format!("{filename}{suffix}")
    }
}

fn collect_imports(stmts: &[Stmt], out: &mut BTreeSet<String>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Import(names) => out.extend(names.iter().map(|name| name.render())),
            StmtKind::ImportFrom { module, names } => {
                let rendered: Vec<String> = names.iter().map(ImportAlias::render).collect();
                out.insert(format!(
                    "from {} import {}",
                    module.join("."),
                    rendered.join(", ")
                ));
            }
            StmtKind::FunctionDef { body, .. }
            | StmtKind::While { body, .. }
            | StmtKind::For { body, .. } => collect_imports(body, out),
            StmtKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                collect_imports(then_branch, out);
                if let Some(branch) = else_branch {
                    collect_imports(branch, out);
                }
            }
            _ => {}
        }
    }
}
