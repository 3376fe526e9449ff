//! Resource name helpers.

use crate::ResourceError;

/// Normalize a resource name.
///
/// - Replaces backslashes with forward slashes
/// - Collapses redundant separators (`a///b` → `a/b`)
/// - Drops `.` segments
/// - Rejects `..` segments
/// - Strips leading and trailing slashes
pub fn normalize(name: &str) -> Result<String, ResourceError> {
    let replaced = name.replace('\\', "/");
    let mut segments = Vec::new();

    for segment in replaced.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment == ".." {
            return Err(ResourceError::InvalidName(format!(
                "'{name}': parent segments (..) not allowed"
            )));
        }
        segments.push(segment);
    }

    if segments.is_empty() {
        return Err(ResourceError::InvalidName("empty name".into()));
    }

    Ok(segments.join("/"))
}

/// Insert `suffix` between the stem and the extension of `name`.
///
/// `with_suffix("sky.png", "_rt")` is `"sky_rt.png"`; names without an
/// extension get the suffix appended.
pub fn with_suffix(name: &str, suffix: &str) -> String {
    let file_start = name.rfind('/').map_or(0, |pos| pos + 1);
    match name[file_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let dot = file_start + dot;
            format!("{}{}{}", &name[..dot], suffix, &name[dot..])
        }
        _ => format!("{name}{suffix}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_name() {
        assert_eq!(
            normalize("textures/brick.png").unwrap(),
            "textures/brick.png"
        );
    }

    #[test]
    fn leading_and_trailing_slashes() {
        assert_eq!(normalize("/textures/").unwrap(), "textures");
    }

    #[test]
    fn redundant_slashes_and_dots() {
        assert_eq!(
            normalize("textures//./brick.png").unwrap(),
            "textures/brick.png"
        );
    }

    #[test]
    fn backslashes() {
        assert_eq!(
            normalize("textures\\brick.png").unwrap(),
            "textures/brick.png"
        );
    }

    #[test]
    fn reject_dotdot() {
        assert!(normalize("textures/../secret.txt").is_err());
    }

    #[test]
    fn reject_empty() {
        assert!(normalize("").is_err());
        assert!(normalize("///").is_err());
        assert!(normalize("././.").is_err());
    }

    #[test]
    fn suffix_before_extension() {
        assert_eq!(with_suffix("sky.png", "_rt"), "sky_rt.png");
        assert_eq!(with_suffix("env/sky.hdr", "_dn"), "env/sky_dn.hdr");
        assert_eq!(with_suffix("env.d/sky", "_up"), "env.d/sky_up");
        assert_eq!(with_suffix(".hidden", "_bk"), ".hidden_bk");
    }
}
