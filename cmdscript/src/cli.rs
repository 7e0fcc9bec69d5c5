//! Command-line argument parsing.
//!
//! Usage:
//!   cmdscript [-d] [-L<dir>]... [-f[<rc>]] -c<script>
//!   cmdscript [-d] [-L<dir>]... [-f[<rc>]] <script-file>|-

use std::path::PathBuf;

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Module search directories (`-L<dir>`, repeatable).
    pub module_dirs: Vec<PathBuf>,
    /// Config-file specification.
    pub config: ConfigFile,
    /// Script to run.
    pub script: ScriptSource,
    /// Debug logging (`-d`).
    pub debug: bool,
}

/// How to choose the rc file.
#[derive(Debug, Default)]
pub enum ConfigFile {
    /// Search the user config dir, then `./.cmdscriptrc` (default).
    #[default]
    Search,
    /// `-f` with no file argument: skip the rc file.
    Skip,
    /// `-f<file>`: load this specific file.
    Explicit(PathBuf),
}

/// Where the script text comes from.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum ScriptSource {
    /// Nothing to run; only the rc file is processed.
    #[default]
    None,
    /// `-c<script>`
    Inline(String),
    /// Positional `-`
    Stdin,
    File(PathBuf),
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(&raw[1..])
}

/// Parse a slice of argument strings (exposed for testing).
///
/// Flags may be combined (`-dL/mods`).  `-c` and `-L` take the rest of their
/// word or, failing that, the next argument; `-f` only ever takes the rest of
/// its word.
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut positional: Option<String> = None;
    let mut words = argv.iter();

    while let Some(word) = words.next() {
        let flags = match word.strip_prefix('-') {
            Some(flags) if !flags.is_empty() => flags,
            _ => {
                if positional.replace(word.clone()).is_some() {
                    return Err("more than one script file given".to_owned());
                }
                continue;
            }
        };

        for (at, flag) in flags.char_indices() {
            let rest = &flags[at + flag.len_utf8()..];
            match flag {
                'd' => args.debug = true,
                'f' => {
                    args.config = if rest.is_empty() {
                        ConfigFile::Skip
                    } else {
                        ConfigFile::Explicit(PathBuf::from(rest))
                    };
                    break;
                }
                'c' | 'L' => {
                    let value = if rest.is_empty() {
                        words
                            .next()
                            .cloned()
                            .ok_or_else(|| format!("-{flag} requires an argument"))?
                    } else {
                        rest.to_owned()
                    };
                    if flag == 'c' {
                        args.script = ScriptSource::Inline(value);
                    } else {
                        args.module_dirs.push(PathBuf::from(value));
                    }
                    break;
                }
                other => return Err(format!("unknown option: -{other}")),
            }
        }
    }

    if let Some(p) = positional {
        if args.script != ScriptSource::None {
            return Err("both -c and a script file given".to_owned());
        }
        args.script = if p == "-" {
            ScriptSource::Stdin
        } else {
            ScriptSource::File(PathBuf::from(p))
        };
    }

    Ok(args)
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Candidate rc file locations, in search order.
pub fn config_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dirs) = directories::ProjectDirs::from("", "", "cmdscript") {
        paths.push(dirs.config_dir().join("rc"));
    }
    paths.push(PathBuf::from("./.cmdscriptrc"));
    paths
}

/// Search for the rc file in the standard locations.
/// Returns the first path that exists, or `None`.
pub fn find_user_config() -> Option<PathBuf> {
    config_candidates().into_iter().find(|p| p.exists())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|&s| s.to_owned()).collect()
    }

    #[test]
    fn empty_args() {
        let a = parse_argv(&argv(&[])).unwrap();
        assert!(!a.debug);
        assert!(matches!(a.config, ConfigFile::Search));
        assert_eq!(a.script, ScriptSource::None);
    }

    #[test]
    fn script_file_positional() {
        let a = parse_argv(&argv(&["ui.cs"])).unwrap();
        assert_eq!(a.script, ScriptSource::File("ui.cs".into()));
    }

    #[test]
    fn dash_means_stdin() {
        let a = parse_argv(&argv(&["-d", "-"])).unwrap();
        assert!(a.debug);
        assert_eq!(a.script, ScriptSource::Stdin);
    }

    #[test]
    fn module_dirs_repeat() {
        let a = parse_argv(&argv(&["-L/a", "-L", "/b"])).unwrap();
        assert_eq!(a.module_dirs, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn combined_flags() {
        let a = parse_argv(&argv(&["-dL/mods"])).unwrap();
        assert!(a.debug);
        assert_eq!(a.module_dirs, vec![PathBuf::from("/mods")]);
    }

    #[test]
    fn config_skip() {
        let a = parse_argv(&argv(&["-f", "ui.cs"])).unwrap();
        assert!(matches!(a.config, ConfigFile::Skip));
        assert_eq!(a.script, ScriptSource::File("ui.cs".into()));
    }

    #[test]
    fn config_explicit_embedded() {
        let a = parse_argv(&argv(&["-fmy.rc"])).unwrap();
        assert!(matches!(&a.config, ConfigFile::Explicit(p) if p == &PathBuf::from("my.rc")));
    }

    #[test]
    fn inline_script() {
        let a = parse_argv(&argv(&["-c(window Main)"])).unwrap();
        assert_eq!(a.script, ScriptSource::Inline("(window Main)".into()));

        let a = parse_argv(&argv(&["-c", "(a (b))"])).unwrap();
        assert_eq!(a.script, ScriptSource::Inline("(a (b))".into()));
    }

    #[test]
    fn inline_and_file_conflict() {
        assert!(parse_argv(&argv(&["-c(a)", "ui.cs"])).is_err());
    }

    #[test]
    fn missing_values() {
        assert!(parse_argv(&argv(&["-c"])).is_err());
        assert!(parse_argv(&argv(&["-L"])).is_err());
    }

    #[test]
    fn too_many_positional() {
        assert!(parse_argv(&argv(&["a", "b"])).is_err());
    }

    #[test]
    fn flag_after_value_word_is_parsed() {
        let a = parse_argv(&argv(&["-L", "/mods", "-d", "-fmy.rc", "ui.cs"])).unwrap();
        assert!(a.debug);
        assert_eq!(a.module_dirs, vec![PathBuf::from("/mods")]);
        assert!(matches!(&a.config, ConfigFile::Explicit(p) if p == &PathBuf::from("my.rc")));
        assert_eq!(a.script, ScriptSource::File("ui.cs".into()));
    }

    #[test]
    fn unknown_flag() {
        assert!(parse_argv(&argv(&["-z"])).is_err());
    }

    #[test]
    fn local_rc_is_last_candidate() {
        let c = config_candidates();
        assert_eq!(c.last(), Some(&PathBuf::from("./.cmdscriptrc")));
    }
}
