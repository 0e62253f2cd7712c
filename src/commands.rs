//! CLI command bodies for mdmove: move, join, check, deps, dependents,
//! cycles, order.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::config::{Config, MoveOptions};
use crate::error;
use crate::graph::DependencyGraph;
use crate::mover::{JoinOptions, Project};
use crate::paths;
use crate::report::OperationResult;
use crate::validate;

/// Flags shared by `move` and `join`.
#[allow(clippy::struct_excessive_bools, reason = "each flag is an independent CLI switch")]
#[derive(Debug, Clone, clap::Args)]
pub struct MoveFlags {
    /// Skip a failing step instead of rolling everything back
    #[arg(long)]
    pub continue_on_error: bool,
    /// Print planned steps without touching any file
    #[arg(long, short = 'n')]
    pub dry_run: bool,
    /// Overwrite an existing destination
    #[arg(long, short = 'f')]
    pub force: bool,
    /// Fail instead of creating missing destination directories
    #[arg(long)]
    pub no_create_dirs: bool,
    /// Check touched files for broken links afterwards
    #[arg(long)]
    pub verify: bool,
}

/// Which edges `neighbors` follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Documents the file references.
    Dependencies,
    /// Documents that reference the file.
    Dependents,
}

/// Check documents for broken local links. With no files, checks every
/// document in the project. Exit 2 when any link is broken.
///
/// # Errors
///
/// Returns errors from config loading, path handling, or JSON output.
pub fn check(root: &Path, files: &[PathBuf], json: bool) -> Result<ExitCode, error::Error> {
    let project = open_project(root)?.0;
    let targets: Vec<PathBuf> = if files.is_empty() {
        let (graph, warnings) = project.graph();
        print_warnings(&warnings);
        graph.paths().cloned().collect()
    } else {
        files.iter().map(|f| return locate(&project, f)).collect()
    };

    let report = validate::validate_files(&targets, project.home());
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in &report.errors {
            println!("{}", relative_to(project.root(), line));
        }
        if report.valid {
            println!("All links in {} document(s) resolve", targets.len());
        } else {
            println!("{} broken link(s) in {} document(s)", report.broken_link_count, targets.len());
        }
    }

    if report.broken_link_count > 0 {
        return Ok(ExitCode::from(2));
    }
    if !report.valid {
        return Ok(ExitCode::FAILURE);
    }
    return Ok(ExitCode::SUCCESS);
}

/// List every reference cycle in the project.
///
/// # Errors
///
/// Returns errors from config loading or JSON output.
pub fn cycles(root: &Path, json: bool) -> Result<ExitCode, error::Error> {
    let project = open_project(root)?.0;
    let graph = project_graph(&project);
    let found = graph.detect_circular_dependencies();

    let rendered: Vec<Vec<String>> = found
        .iter()
        .map(|cycle| return cycle.iter().map(|p| return display(project.root(), p)).collect())
        .collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&rendered)?);
    } else if rendered.is_empty() {
        println!("No reference cycles");
    } else {
        for cycle in &rendered {
            println!("{}", cycle.join(" -> "));
        }
    }
    return Ok(ExitCode::SUCCESS);
}

/// List what a document references, directly or transitively.
///
/// # Errors
///
/// Returns errors from config loading, path handling, or JSON output.
pub fn deps(root: &Path, file: &Path, transitive: bool, json: bool) -> Result<ExitCode, error::Error> {
    return neighbors(root, file, transitive, json, Direction::Dependencies);
}

/// List the documents that reference a file, directly or transitively.
///
/// # Errors
///
/// Returns errors from config loading, path handling, or JSON output.
pub fn dependents(root: &Path, file: &Path, transitive: bool, json: bool) -> Result<ExitCode, error::Error> {
    return neighbors(root, file, transitive, json, Direction::Dependents);
}

/// A path relative to the project root, with `/` separators.
fn display(root: &Path, path: &Path) -> String {
    return paths::to_slash(path.strip_prefix(root).unwrap_or(path));
}

/// Emit an operation result and map it to an exit code.
///
/// # Errors
///
/// Returns `Error::Json` if JSON serialization fails.
fn emit(project: &Project, result: &OperationResult, json: bool, verbose: bool) -> Result<ExitCode, error::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        print!("{}", result.render_human(project.root(), verbose));
    }
    if result.success {
        return Ok(ExitCode::SUCCESS);
    }
    return Ok(ExitCode::FAILURE);
}

/// Concatenate documents into one and redirect every link to them.
///
/// # Errors
///
/// Returns validation errors for bad paths, and errors from config
/// loading or JSON output.
#[allow(clippy::too_many_arguments, reason = "mirrors the CLI surface one to one")]
#[allow(clippy::fn_params_excessive_bools, reason = "mirrors the CLI surface one to one")]
pub fn join(
    root: &Path,
    sources: &[PathBuf],
    destination: &Path,
    flags: &MoveFlags,
    topological: bool,
    keep_sources: bool,
    json: bool,
    verbose: bool,
) -> Result<ExitCode, error::Error> {
    let (project, config) = open_project(root)?;
    let join_options = JoinOptions {
        keep_sources,
        options: move_options(&config, flags, verbose),
        topological,
    };
    let result = project.join(sources, destination, &join_options)?;
    return emit(&project, &result, json, join_options.options.verbose);
}

/// Move one document, or several into a directory.
///
/// # Errors
///
/// Returns validation errors for bad paths, and errors from config
/// loading or JSON output.
pub fn move_files(
    root: &Path,
    sources: &[PathBuf],
    destination: &Path,
    flags: &MoveFlags,
    json: bool,
    verbose: bool,
) -> Result<ExitCode, error::Error> {
    let (project, config) = open_project(root)?;
    let options = move_options(&config, flags, verbose);
    let result = if let [source] = sources {
        project.move_one(source, destination, &options)?
    } else {
        let moves: Vec<(PathBuf, PathBuf)> =
            sources.iter().map(|s| return (s.clone(), destination.to_path_buf())).collect();
        project.move_many(&moves, &options)?
    };
    return emit(&project, &result, json, options.verbose);
}

/// Resolve the config file and CLI flags into one options struct.
fn move_options(config: &Config, flags: &MoveFlags, verbose: bool) -> MoveOptions {
    return MoveOptions {
        allow_outside_root: config.allow_outside_root,
        continue_on_error: flags.continue_on_error || config.transaction.continue_on_error,
        create_directories: !flags.no_create_dirs,
        dry_run: flags.dry_run,
        force: flags.force,
        retry: config.retry_policy(),
        verbose,
        verify: flags.verify,
    };
}

/// Print a document's neighbors in one direction.
///
/// # Errors
///
/// Returns errors from config loading, path handling, or JSON output.
fn neighbors(
    root: &Path,
    file: &Path,
    transitive: bool,
    json: bool,
    direction: Direction,
) -> Result<ExitCode, error::Error> {
    let project = open_project(root)?.0;
    let graph = project_graph(&project);
    let path = locate(&project, file);
    let node = graph.get_node(&path);
    if direction == Direction::Dependencies && node.is_none() {
        return Err(error::Error::FileNotFound { path });
    }

    let found = match (direction, transitive) {
        (Direction::Dependencies, false) => graph.get_dependencies(&path),
        (Direction::Dependencies, true) => graph.get_transitive_dependencies(&path),
        (Direction::Dependents, false) => {
            node.map_or_else(|| return graph.get_dependents(&path), |n| return n.document.dependents.clone())
        },
        (Direction::Dependents, true) => graph.get_transitive_dependents(&path),
    };
    let rendered: Vec<String> = found.iter().map(|p| return display(project.root(), p)).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&rendered)?);
    } else {
        for line in &rendered {
            println!("{line}");
        }
    }
    return Ok(ExitCode::SUCCESS);
}

/// A FILE argument as an absolute path. Relative paths are taken from the
/// project root, not the current directory.
fn locate(project: &Project, file: &Path) -> PathBuf {
    return paths::normalize(&project.root().join(file));
}

/// Load `.mdmove.toml` from `root` and open the project.
///
/// # Errors
///
/// Returns errors from config loading or root resolution.
fn open_project(root: &Path) -> Result<(Project, Config), error::Error> {
    let config = Config::load(root)?;
    let project = Project::new(root, config.clone(), paths::home_dir())?;
    return Ok((project, config));
}

/// Print documents so each precedes the documents it references.
///
/// # Errors
///
/// Returns errors from config loading or JSON output.
pub fn order(root: &Path, json: bool) -> Result<ExitCode, error::Error> {
    let project = open_project(root)?.0;
    let graph = project_graph(&project);
    if graph.is_empty() && !json {
        println!("No documents under {}", project.root().display());
        return Ok(ExitCode::SUCCESS);
    }
    let rendered: Vec<String> =
        graph.topological_sort().iter().map(|p| return display(project.root(), p)).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&rendered)?);
    } else {
        for line in &rendered {
            println!("{line}");
        }
    }
    return Ok(ExitCode::SUCCESS);
}

/// Scan a project into its graph, reporting scan warnings to stderr.
fn project_graph(project: &Project) -> DependencyGraph {
    let (graph, warnings) = project.graph();
    print_warnings(&warnings);
    return graph;
}

/// Print scan warnings to stderr.
fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        eprintln!("warning: {warning}");
    }
    return;
}

/// Shorten absolute paths under `root` inside a message.
fn relative_to(root: &Path, message: &str) -> String {
    let prefix = format!("{}/", paths::to_slash(root));
    return message.replace(&prefix, "");
}
