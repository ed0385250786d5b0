// SPDX-License-Identifier: MIT OR Apache-2.0
//! Headless Karst editor entry point.
//!
//! Runs the world editor core without a GUI or renderer; the main use
//! is the command-log regression harness:
//!
//! ```text
//! karst_editor [-pseudorandom_guid] [run_test <dir> <name>]
//! ```
//!
//! `run_test` replays `<dir>/<name>.json` into a fresh project,
//! compares the result against the reference snapshot at
//! `<dir>/<name>/`, and exits non-zero on a mismatch.

use std::path::PathBuf;
use std::process::ExitCode;

use karst_editor::editor::WorldEditorOptions;
use karst_editor::fs::NullFileSystem;
use karst_editor::render::NullRenderInterface;
use karst_editor::WorldEditor;

struct Args {
    pseudorandom_guid: bool,
    run_test: Option<(PathBuf, String)>,
}

fn parse_args() -> Args {
    let mut args = Args {
        pseudorandom_guid: false,
        run_test: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-pseudorandom_guid" => args.pseudorandom_guid = true,
            "run_test" => {
                let dir = iter.next().map(PathBuf::from);
                let name = iter.next();
                match (dir, name) {
                    (Some(dir), Some(name)) => args.run_test = Some((dir, name)),
                    _ => tracing::error!("run_test needs <dir> and <name>"),
                }
            }
            other => tracing::warn!(argument = other, "ignoring unknown argument"),
        }
    }
    args
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("karst_editor=info".parse().expect("valid directive")),
        )
        .init();

    tracing::info!("Karst editor v{}", env!("CARGO_PKG_VERSION"));
    let args = parse_args();

    let options = WorldEditorOptions {
        base_path: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        pseudorandom_guid: args.pseudorandom_guid,
        camera_component: None,
    };
    let mut editor = WorldEditor::new(
        options,
        |_project| {
            // Scene plugins register here once the renderer and
            // physics collaborators are linked in.
        },
        Box::new(NullRenderInterface),
        Box::new(NullFileSystem),
    );

    if let Some((dir, name)) = args.run_test {
        let passed = editor.run_test(&dir, &name);
        tracing::info!(name = %name, passed, "test finished");
        return if passed {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    ExitCode::SUCCESS
}
