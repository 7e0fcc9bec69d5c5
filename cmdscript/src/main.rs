use std::io::Read;
use std::path::Path;

use cmdscript::cli::{self, CliArgs, ConfigFile, ScriptSource};
use cmdscript::config::Config;
use cmdscript::{Engine, Registry};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("cmdscript: {e}");
            eprintln!("Usage: cmdscript [-d] [-L<dir>] [-f[<rc>]] -c<script>");
            eprintln!("       cmdscript [-d] [-L<dir>] [-f[<rc>]] <script-file>|-");
            std::process::exit(1);
        }
    };

    install_tracing(args.debug);

    if let Err(e) = run(args) {
        eprintln!("cmdscript: {e}");
        std::process::exit(1);
    }
}

fn install_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    if debug {
        if let Ok(directive) = "cmdscript=debug".parse() {
            filter = filter.add_directive(directive);
        }
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(args: CliArgs) -> Result<(), String> {
    let mut registry = Registry::new();
    for dir in &args.module_dirs {
        registry.add_search_dir(dir.clone());
    }
    let mut engine = Engine::with_builtins();

    // ── rc file ───────────────────────────────────────────────────────────────
    let rc = match args.config {
        ConfigFile::Skip => None,
        ConfigFile::Explicit(path) => Some(path),
        ConfigFile::Search => cli::find_user_config(),
    };
    if let Some(path) = rc {
        load_config(&path, &mut registry, &mut engine)?;
    }

    let imported = engine.import_registry(&mut registry).map_err(|e| e.to_string())?;
    info!(imported, "modules ready");

    // ── Script ────────────────────────────────────────────────────────────────
    let script = match args.script {
        ScriptSource::None => return Ok(()),
        ScriptSource::Inline(text) => text,
        ScriptSource::Stdin => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .map_err(|e| format!("stdin: {e}"))?;
            text
        }
        ScriptSource::File(path) => std::fs::read_to_string(&path)
            .map_err(|e| format!("{}: {e}", path.display()))?,
    };

    engine.execute(&script, &mut ()).map_err(|e| e.to_string())
}

/// Load and apply an rc file.  Bad lines are warnings; an unreadable file is
/// fatal.
fn load_config(path: &Path, registry: &mut Registry, engine: &mut Engine) -> Result<(), String> {
    let (config, errors) =
        Config::load_file(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let applied = config.apply(registry, engine);
    for e in errors.iter().chain(&applied) {
        eprintln!("cmdscript: warning: {}: {e}", path.display());
    }
    info!(path = %path.display(), modules = config.modules.len(), "rc loaded");
    Ok(())
}
