//! Path resolution: absolute, relative, and home-relative forms, plus the
//! rewrite that keeps a relative reference pointing at the same file after
//! either end of it moves. Pure string/path logic; the only I/O is
//! `absolutize` (current directory) and the directory check in
//! `resolve_destination`.

use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};

use crate::error::Error;

/// File extensions treated as documents.
const DOCUMENT_EXTENSIONS: [&str; 2] = ["md", "markdown"];

/// Make a path absolute against the current directory and normalize it.
///
/// # Errors
///
/// Returns `Error::Io` if the current directory cannot be determined.
pub fn absolutize(path: &Path) -> Result<PathBuf, Error> {
    let absolute = std::path::absolute(path)?;
    return Ok(normalize(&absolute));
}

/// Text of `path` relative to `from_dir`, always `/`-separated.
/// Both inputs must be absolute and normalized. Falls back to the absolute
/// path when the two share no root (different drives).
pub fn relative_path(target: &Path, from_dir: &Path) -> String {
    let target_parts: Vec<Component<'_>> = target.components().collect();
    let base_parts: Vec<Component<'_>> = from_dir.components().collect();
    let common = target_parts
        .iter()
        .zip(&base_parts)
        .take_while(|(a, b)| return a == b)
        .count();

    if common == 0 {
        return to_slash(target);
    }

    let ups = base_parts.len().saturating_sub(common);
    let mut segments: Vec<String> = std::iter::repeat_n("..".to_string(), ups).collect();
    segments.extend(
        target_parts
            .iter()
            .skip(common)
            .map(|c| return c.as_os_str().to_string_lossy().into_owned()),
    );

    if segments.is_empty() {
        return ".".to_string();
    }
    return segments.join("/");
}

/// Decode `%XX` escapes in a link target. A target that does not decode to
/// UTF-8 is taken literally.
fn decode(raw: &str) -> Cow<'_, str> {
    return urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw));
}

/// Home directory of the current user, if the platform reports one.
pub fn home_dir() -> Option<PathBuf> {
    return dirs::home_dir();
}

/// Whether the path has a markdown extension.
pub fn is_document(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| return e.to_str()) else {
        return false;
    };
    return DOCUMENT_EXTENSIONS.iter().any(|d| return d.eq_ignore_ascii_case(ext));
}

/// Whether a raw target is written in a form that does not depend on the
/// containing document's location: absolute or `~/`.
pub fn is_absolute_form(raw: &str) -> bool {
    return is_home_relative(raw) || raw.starts_with('/') || Path::new(raw).is_absolute();
}

/// Whether a raw target starts with `~/` (or is exactly `~`).
pub fn is_home_relative(raw: &str) -> bool {
    return raw == "~" || raw.starts_with("~/");
}

/// Collapse `.` and `..` components in a path without touching the filesystem.
/// Preserves leading `..` on relative paths; drops `..` that would climb above
/// an absolute root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut components: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        push_normalized_component(&mut components, component);
    }
    return components.iter().collect();
}

/// Handle a single path component during normalization.
fn push_normalized_component<'a>(components: &mut Vec<Component<'a>>, component: Component<'a>) {
    match component {
        Component::CurDir => {},
        Component::ParentDir => match components.last().copied() {
            Some(Component::Normal(_)) => {
                components.pop();
            },
            Some(Component::RootDir | Component::Prefix(_)) => {},
            Some(Component::ParentDir | Component::CurDir) | None => components.push(component),
        },
        other => components.push(other),
    }
    return;
}

/// Resolve a raw path against a base directory.
///
/// `%XX` escapes are decoded first. Home-relative paths join under `home`
/// (and are unresolvable without one), absolute paths are normalized as-is,
/// everything else joins under `base_dir`.
pub fn resolve(raw: &str, base_dir: &Path, home: Option<&Path>) -> Option<PathBuf> {
    let decoded = decode(raw);
    let raw = decoded.as_ref();
    if is_home_relative(raw) {
        let home = home?;
        let rest = raw.strip_prefix("~/").unwrap_or("");
        return Some(normalize(&home.join(rest)));
    }
    let path = Path::new(raw);
    if path.is_absolute() {
        return Some(normalize(path));
    }
    return Some(normalize(&base_dir.join(path)));
}

/// Apply the directory-destination rule: an existing directory, or a
/// destination written with a trailing separator, receives the source's
/// file name.
pub fn resolve_destination(source: &Path, destination: &Path) -> PathBuf {
    let raw = destination.as_os_str().to_string_lossy();
    let dir_like = raw.ends_with('/') || raw.ends_with(std::path::MAIN_SEPARATOR) || destination.is_dir();
    if dir_like && let Some(name) = source.file_name() {
        return destination.join(name);
    }
    return destination.to_path_buf();
}

/// Express `new_target` the way the original `raw` target was written, as
/// seen from `containing_doc`. Used when the referenced file moved.
///
/// Absolute targets become the new absolute path; `~/` targets stay
/// home-relative while the new target is under `home`; relative targets are
/// recomputed from the containing directory. Fragments are carried over.
pub fn retarget(raw: &str, containing_doc: &Path, new_target: &Path, home: Option<&Path>) -> String {
    let (path_part, fragment) = split_fragment(raw);

    let expressed = if is_home_relative(path_part) {
        match home.and_then(|h| return new_target.strip_prefix(h).ok()) {
            Some(rest) => format!("~/{}", to_slash(rest)),
            None => to_slash(new_target),
        }
    } else if is_absolute_form(path_part) {
        to_slash(new_target)
    } else {
        let dir = containing_doc.parent().unwrap_or(Path::new("/"));
        style_like(path_part, relative_path(new_target, dir))
    };

    return format!("{expressed}{fragment}");
}

/// Recompute a reference after its containing document moved from
/// `old_doc` to `new_doc`, keeping the same absolute target.
///
/// Absolute and home-relative targets are move-invariant and returned
/// unchanged, as are pure `#anchor` targets.
pub fn rewrite_for_move(raw: &str, old_doc: &Path, new_doc: &Path, home: Option<&Path>) -> String {
    let (path_part, fragment) = split_fragment(raw);
    if path_part.is_empty() || is_absolute_form(path_part) {
        return raw.to_string();
    }

    let old_dir = old_doc.parent().unwrap_or(Path::new("/"));
    let Some(target) = resolve(path_part, old_dir, home) else {
        return raw.to_string();
    };
    let new_dir = new_doc.parent().unwrap_or(Path::new("/"));
    let expressed = style_like(path_part, relative_path(&target, new_dir));

    return format!("{expressed}{fragment}");
}

/// Split `path#fragment` into the path and the fragment (with its `#`).
pub fn split_fragment(raw: &str) -> (&str, &str) {
    return match raw.find('#') {
        Some(idx) => raw.split_at(idx),
        None => (raw, ""),
    };
}

/// Carry the original's `./` prefix, trailing `/`, and percent-encoding onto
/// a recomputed path.
fn style_like(original: &str, mut recomputed: String) -> String {
    if original.contains('%') {
        recomputed = recomputed
            .split('/')
            .map(|segment| return urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
    }
    if original.ends_with('/') && !recomputed.ends_with('/') {
        recomputed.push('/');
    }
    let wants_dot_prefix = original.starts_with("./") || original == ".";
    if wants_dot_prefix && !recomputed.starts_with("..") && !recomputed.starts_with('.') {
        return format!("./{recomputed}");
    }
    return recomputed;
}

/// Render a path with `/` separators regardless of platform.
pub fn to_slash(path: &Path) -> String {
    let text = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        return text.into_owned();
    }
    return text.replace(std::path::MAIN_SEPARATOR, "/");
}

/// Validate a user-supplied path and return its absolute, normalized form.
///
/// # Errors
///
/// Returns `Error::EmptyPath` for an empty path, `Error::InvalidPath` for a
/// path containing NUL, or `Error::OutsideRoot` if the path escapes `root`
/// and `allow_outside_root` is false.
pub fn validate(path: &Path, root: &Path, allow_outside_root: bool) -> Result<PathBuf, Error> {
    let raw = path.as_os_str();
    if raw.is_empty() {
        return Err(Error::EmptyPath);
    }
    if raw.as_encoded_bytes().contains(&0) {
        return Err(Error::InvalidPath {
            path: raw.to_string_lossy().into_owned(),
            reason: "contains a NUL byte",
        });
    }

    let absolute = absolutize(path)?;
    if !allow_outside_root && !absolute.starts_with(root) {
        return Err(Error::OutsideRoot {
            path: absolute,
            root: root.to_path_buf(),
        });
    }
    return Ok(absolute);
}

#[cfg(test)]
#[allow(clippy::missing_panics_doc, reason = "tests")]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dots() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("../x/./y")), PathBuf::from("../x/y"));
        assert_eq!(normalize(Path::new("/../a")), PathBuf::from("/a"));
    }

    #[test]
    fn resolve_relative_absolute_and_home() {
        let base = Path::new("/p/docs");
        let home = Path::new("/home/me");
        assert_eq!(resolve("./b.md", base, None), Some(PathBuf::from("/p/docs/b.md")));
        assert_eq!(resolve("../r.md", base, None), Some(PathBuf::from("/p/r.md")));
        assert_eq!(resolve("/etc/x.md", base, None), Some(PathBuf::from("/etc/x.md")));
        assert_eq!(resolve("~/n.md", base, Some(home)), Some(PathBuf::from("/home/me/n.md")));
        assert_eq!(resolve("~/n.md", base, None), None);
    }

    #[test]
    fn relative_path_walks_up_and_down() {
        assert_eq!(relative_path(Path::new("/p/docs/b.md"), Path::new("/p/docs/sub")), "../b.md");
        assert_eq!(relative_path(Path::new("/p/docs/sub/a.md"), Path::new("/p/docs")), "sub/a.md");
        assert_eq!(relative_path(Path::new("/p/x/y.md"), Path::new("/p/docs/sub")), "../../x/y.md");
        assert_eq!(relative_path(Path::new("/p/docs"), Path::new("/p/docs")), ".");
    }

    #[test]
    fn rewrite_for_move_into_subdirectory() {
        let old = Path::new("/p/docs/a.md");
        let new = Path::new("/p/docs/sub/a.md");
        assert_eq!(rewrite_for_move("./b.md", old, new, None), "../b.md");
        assert_eq!(rewrite_for_move("b.md#intro", old, new, None), "../b.md#intro");
        assert_eq!(rewrite_for_move("#local", old, new, None), "#local");
        assert_eq!(rewrite_for_move("/abs/b.md", old, new, None), "/abs/b.md");
        assert_eq!(rewrite_for_move("~/notes.md", old, new, None), "~/notes.md");
    }

    #[test]
    fn rewrite_round_trips_to_same_target() {
        let old = Path::new("/p/docs/a.md");
        let new = Path::new("/p/other/deep/a.md");
        for raw in ["./b.md", "../top.md", "sub/c.md", "../../outside.md"] {
            let rewritten = rewrite_for_move(raw, old, new, None);
            let before = resolve(raw, Path::new("/p/docs"), None);
            let after = resolve(&rewritten, Path::new("/p/other/deep"), None);
            assert_eq!(before, after, "{raw} -> {rewritten}");
        }
    }

    #[test]
    fn retarget_keeps_style() {
        let doc = Path::new("/p/docs/d.md");
        let home = Path::new("/p");
        assert_eq!(retarget("./a.md", doc, Path::new("/p/docs/sub/a.md"), None), "./sub/a.md");
        assert_eq!(retarget("a.md#top", doc, Path::new("/p/docs/sub/a.md"), None), "sub/a.md#top");
        assert_eq!(retarget("./a.md", doc, Path::new("/p/a.md"), None), "../a.md");
        assert_eq!(retarget("/p/docs/a.md", doc, Path::new("/p/z/a.md"), None), "/p/z/a.md");
        assert_eq!(retarget("~/docs/a.md", doc, Path::new("/p/z/a.md"), Some(home)), "~/z/a.md");
    }

    #[test]
    fn percent_encoded_targets() {
        let base = Path::new("/p/docs");
        assert_eq!(resolve("my%20doc.md", base, None), Some(PathBuf::from("/p/docs/my doc.md")));
        assert_eq!(resolve("a%2Emd", base, None), Some(PathBuf::from("/p/docs/a.md")));

        let old = Path::new("/p/docs/a.md");
        let new = Path::new("/p/docs/sub/a.md");
        assert_eq!(rewrite_for_move("my%20doc.md#top", old, new, None), "../my%20doc.md#top");
        let doc = Path::new("/p/docs/d.md");
        assert_eq!(
            retarget("./my%20doc.md", doc, Path::new("/p/docs/new dir/my doc.md"), None),
            "./new%20dir/my%20doc.md"
        );
        assert_eq!(retarget("my doc.md", doc, Path::new("/p/docs/new dir/my doc.md"), None), "new dir/my doc.md");
    }

    #[test]
    fn trailing_slash_survives() {
        let old = Path::new("/p/docs/a.md");
        let new = Path::new("/p/a.md");
        assert_eq!(rewrite_for_move("./assets/", old, new, None), "./docs/assets/");
    }

    #[test]
    fn validate_rejects_bad_paths() {
        let root = Path::new("/p");
        assert!(matches!(validate(Path::new(""), root, false), Err(Error::EmptyPath)));
        assert!(matches!(validate(Path::new("a\0b.md"), root, false), Err(Error::InvalidPath { .. })));
        assert!(matches!(validate(Path::new("/elsewhere/a.md"), root, false), Err(Error::OutsideRoot { .. })));
        assert!(validate(Path::new("/elsewhere/a.md"), root, true).is_ok());
        assert!(validate(Path::new("/p/docs/../a.md"), root, false).is_ok());
    }

    #[test]
    fn directory_destination_receives_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let source = Path::new("/p/docs/a.md");
        assert_eq!(resolve_destination(source, dir.path()), dir.path().join("a.md"));
        assert_eq!(resolve_destination(source, Path::new("/p/new/")), PathBuf::from("/p/new/a.md"));
        assert_eq!(resolve_destination(source, Path::new("/p/new/b.md")), PathBuf::from("/p/new/b.md"));
    }

    #[test]
    fn document_extensions() {
        assert!(is_document(Path::new("a.md")));
        assert!(is_document(Path::new("a.Markdown")));
        assert!(!is_document(Path::new("a.txt")));
        assert!(!is_document(Path::new("README")));
    }
}
