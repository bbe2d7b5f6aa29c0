//! Turning what the operator typed into an absolute command line.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;

use sm_core::Error;

/// How much of a file is read to decide between binary and script.
const SNIFF_LEN: usize = 256;

/// A command line ready to be placed into a service descriptor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub interpreter: Option<String>,
    pub exec: String,
    pub argv: Vec<String>,
    /// Service name suggested by the program the operator named.
    pub name_hint: String,
    /// Problems that `force` let through.
    pub warnings: Vec<String>,
}

/// Find an executable on `PATH`, or relative to the working directory when
/// it contains a path separator.
pub fn find_exec(exe: &str) -> Result<PathBuf, Error> {
    match which::which(exe) {
        Ok(path) => std::path::absolute(&path)
            .map_err(|e| Error::io(format!("failed to resolve {}", path.display()), e)),
        Err(e) => {
            debug!(exe, error = %e, "executable lookup failed");
            let has_sep = exe.contains('/') || exe.contains('\\');
            let exists = Path::new(exe).exists();
            let reason = match (has_sep, exists) {
                (true, true) => format!("not an executable (try 'chmod a+x {}')", exe),
                (true, false) => "not found in PATH or working directory".to_string(),
                (false, true) => format!("not found in PATH, did you mean './{}'?", exe),
                (false, false) => "not found in PATH".to_string(),
            };
            Err(Error::ExecutableNotFound {
                exec: exe.to_string(),
                reason,
            })
        }
    }
}

/// The interpreter line of a script, split into words.
///
/// `Ok(None)` means the file looks like a native binary. A text file with no
/// `#!` line is an error, since there is no telling how to run it.
pub fn inspect_script(path: &Path) -> Result<Option<Vec<String>>, Error> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    File::open(path)
        .and_then(|f| f.take(SNIFF_LEN as u64).read_to_end(&mut head))
        .map_err(|e| Error::ExecutableNotFound {
            exec: path.display().to_string(),
            reason: format!("could not read file: {}", e),
        })?;

    if head.len() < "#!/x".len() {
        return Err(Error::ExecutableNotFound {
            exec: path.display().to_string(),
            reason: "file is too short to be a program".to_string(),
        });
    }

    if !head.starts_with(b"#!") {
        if looks_like_text(&head) {
            return Err(Error::ExecutableNotFound {
                exec: path.display().to_string(),
                reason: "looks like a script, but has no '#!' line naming its interpreter \
                         (name the interpreter explicitly, e.g. 'python my-script.py')"
                    .to_string(),
            });
        }
        return Ok(None);
    }

    let first_line = head[2..]
        .split(|b| *b == b'\n')
        .next()
        .unwrap_or_default();
    let words: Vec<String> = String::from_utf8_lossy(first_line)
        .split_whitespace()
        .map(str::to_string)
        .collect();

    match words.first() {
        None => Err(Error::ExecutableNotFound {
            exec: path.display().to_string(),
            reason: "empty '#!' line".to_string(),
        }),
        Some(first) if first.ends_with("/env") && words.len() > 1 => Ok(Some(words[1..].to_vec())),
        Some(_) => Ok(Some(words)),
    }
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // a multi-byte character cut off by the sniff window
        Err(e) => e.error_len().is_none(),
    }
}

/// Resolve `program` and its interpreter. With `force`, lookups that fail
/// are recorded as warnings and the names are kept as typed.
pub fn resolve_command(
    program: &str,
    args: &[String],
    force: bool,
) -> Result<ResolvedCommand, Error> {
    let mut warnings = Vec::new();
    let name_hint = Path::new(program)
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let exe = match find_exec(program) {
        Ok(path) => path,
        Err(e) if force => {
            warnings.push(e.to_string());
            PathBuf::from(program)
        }
        Err(e) => return Err(e),
    };

    let shebang = match inspect_script(&exe) {
        Ok(words) => words.unwrap_or_default(),
        Err(e) if force => {
            warnings.push(e.to_string());
            Vec::new()
        }
        Err(e) => return Err(e),
    };

    let exe = exe.to_string_lossy().into_owned();
    let mut resolved = ResolvedCommand {
        name_hint,
        ..Default::default()
    };

    let Some((interp, interp_args)) = shebang.split_first() else {
        resolved.exec = exe;
        resolved.argv = args.to_vec();
        resolved.warnings = warnings;
        return Ok(resolved);
    };

    let interp = match find_exec(interp) {
        Ok(path) => path.to_string_lossy().into_owned(),
        Err(e) if force => {
            warnings.push(e.to_string());
            interp.clone()
        }
        Err(e) => return Err(e),
    };

    if interp_args.is_empty() {
        resolved.interpreter = Some(interp);
        resolved.exec = exe;
        resolved.argv = args.to_vec();
    } else {
        resolved.exec = interp;
        resolved.argv = interp_args.to_vec();
        resolved.argv.push(exe);
        resolved.argv.extend(args.iter().cloned());
    }
    resolved.warnings = warnings;
    Ok(resolved)
}

/// Make arguments that look like paths (`.` or containing `/`) absolute.
///
/// A path that does not exist is an error unless `force`, in which case the
/// argument is passed through untouched.
pub fn absolutize_path_args(args: &[String], force: bool) -> Result<Vec<String>, Error> {
    args.iter()
        .map(|arg| {
            if arg != "." && !arg.contains('/') {
                return Ok(arg.clone());
            }
            let abs = std::path::absolute(arg)
                .map_err(|e| Error::io(format!("'{}' appears to be a file path", arg), e))?;
            if abs.exists() {
                Ok(abs.to_string_lossy().into_owned())
            } else if force {
                Ok(arg.clone())
            } else {
                Err(Error::Io {
                    message: format!(
                        "'{}' appears to be a file path, but '{}' could not be read",
                        arg,
                        abs.display()
                    ),
                })
            }
        })
        .collect()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_exec(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn finds_sh_on_path() {
        let sh = find_exec("sh").unwrap();
        assert!(sh.is_absolute());
    }

    #[test]
    fn unknown_program_is_not_found() {
        let err = find_exec("serviceman-no-such-program").unwrap_err();
        assert!(matches!(err, Error::ExecutableNotFound { .. }));
    }

    #[test]
    fn non_executable_file_suggests_chmod() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("plain.sh");
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let err = find_exec(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("chmod a+x"));
    }

    #[test]
    fn env_shebang_yields_interpreter_name() {
        let tmp = TempDir::new().unwrap();
        let script = write_exec(tmp.path(), "app.js", b"#!/usr/bin/env node\nconsole.log(1)\n");
        assert_eq!(
            inspect_script(&script).unwrap(),
            Some(vec!["node".to_string()])
        );
    }

    #[test]
    fn direct_shebang_keeps_its_flags() {
        let tmp = TempDir::new().unwrap();
        let script = write_exec(
            tmp.path(),
            "app.js",
            b"#!/usr/bin/node --harmony\r\nconsole.log(1)\n",
        );
        assert_eq!(
            inspect_script(&script).unwrap(),
            Some(vec!["/usr/bin/node".to_string(), "--harmony".to_string()])
        );
    }

    #[test]
    fn text_without_shebang_is_refused() {
        let tmp = TempDir::new().unwrap();
        let script = write_exec(tmp.path(), "app.py", b"print('hello world')\n");
        assert!(inspect_script(&script).is_err());
    }

    #[test]
    fn binary_content_is_not_a_script() {
        let tmp = TempDir::new().unwrap();
        let bin = write_exec(tmp.path(), "app", b"\x7fELF\x02\x01\x01\x00\x00\x00\xff\xfe");
        assert_eq!(inspect_script(&bin).unwrap(), None);
    }

    #[test]
    fn shell_script_runs_through_its_interpreter() {
        let tmp = TempDir::new().unwrap();
        let script = write_exec(tmp.path(), "Serve.sh", b"#!/bin/sh\necho hi\n");

        let resolved =
            resolve_command(script.to_str().unwrap(), &["--port".to_string()], false).unwrap();

        assert_eq!(resolved.interpreter.as_deref(), Some("/bin/sh"));
        assert_eq!(resolved.exec, script.to_string_lossy());
        assert_eq!(resolved.argv, vec!["--port"]);
        assert_eq!(resolved.name_hint, "serve");
        assert!(resolved.warnings.is_empty());
    }

    #[test]
    fn shebang_flags_go_before_the_script() {
        let tmp = TempDir::new().unwrap();
        let script = write_exec(tmp.path(), "job.sh", b"#!/bin/sh -e\necho hi\n");

        let resolved = resolve_command(script.to_str().unwrap(), &["x".to_string()], false).unwrap();

        assert_eq!(resolved.interpreter, None);
        assert_eq!(resolved.exec, "/bin/sh");
        assert_eq!(
            resolved.argv,
            vec!["-e".to_string(), script.to_string_lossy().into_owned(), "x".to_string()]
        );
    }

    #[test]
    fn force_keeps_missing_program_as_typed() {
        let resolved = resolve_command("./serviceman-missing", &[], true).unwrap();
        assert_eq!(resolved.exec, "./serviceman-missing");
        assert!(!resolved.warnings.is_empty());
        assert_eq!(resolved.name_hint, "serviceman-missing");
    }

    #[test]
    fn path_like_args_become_absolute() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("conf.toml");
        fs::write(&file, "").unwrap();

        let args = vec![
            "--config".to_string(),
            file.to_string_lossy().into_owned(),
            ".".to_string(),
        ];
        let out = absolutize_path_args(&args, false).unwrap();
        assert_eq!(out[0], "--config");
        assert_eq!(out[1], file.to_string_lossy());
        assert!(Path::new(&out[2]).is_absolute());
    }

    #[test]
    fn missing_path_arg_needs_force() {
        let args = vec!["./no/such/file".to_string()];
        assert!(absolutize_path_args(&args, false).is_err());
        assert_eq!(absolutize_path_args(&args, true).unwrap(), args);
    }
}
