//! plume shell: run a script file, or start an interactive prompt.
//!
//! Exit codes: 0 on success, 1 when the script file cannot be read, 2 when
//! the context cannot be created.

use std::io::{BufRead as _, Write as _};
use std::process::ExitCode;

use plume::{Config, Context, UnOp};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    if args.len() <= 1 {
        return run_repl();
    }
    if args[1] == "--version" {
        println!("plume {VERSION}");
        return ExitCode::SUCCESS;
    }
    run_file(&args[1..])
}

fn run_file(args: &[String]) -> ExitCode {
    let path = &args[0];
    let Ok(script) = std::fs::read_to_string(path) else {
        return ExitCode::from(1);
    };

    let import_path = std::path::Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned());

    let mut config = Config::default();
    config.argv = args.to_vec();
    config.enable_os_access = true;
    config.import_path = import_path;

    let Ok(mut ctx) = Context::new(config) else {
        return ExitCode::from(2);
    };

    if ctx.execute(&script, path).is_err() {
        eprint!("{}", ctx.error_message());
    }
    ExitCode::SUCCESS
}

fn run_repl() -> ExitCode {
    let mut config = Config::default();
    config.enable_os_access = true;
    let Ok(mut ctx) = Context::new(config) else {
        return ExitCode::from(2);
    };

    // A scratch context checks whether the pending input parses as a lone
    // expression, so the prompt can echo values without executing twice.
    let Ok(mut expr_checker) = Context::new(Config::default()) else {
        return ExitCode::from(2);
    };

    let system_exit = ctx.get_global("SystemExit");

    println!("plume {VERSION}");

    let stdin = std::io::stdin();
    let mut input = String::new();
    let mut indented = false;
    loop {
        if input.is_empty() {
            print!(">>> ");
        } else {
            print!("... ");
        }
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            return ExitCode::SUCCESS;
        }
        let line = line.trim_end_matches(['\n', '\r']);
        input.push_str(line);
        input.push('\n');

        // A trailing colon opens a block; keep reading until a blank line.
        if line.trim_end().ends_with(':') {
            indented = true;
            continue;
        }
        if indented && !line.is_empty() {
            continue;
        }

        expr_checker.clear_exception();
        let is_expression = expr_checker.compile_expression(&input, "<string>").is_ok();

        let mut echo = None;
        if is_expression {
            if let Ok(value) = ctx.eval_expression(&input, "<string>") {
                if !ctx.is_none(value) {
                    echo = ctx
                        .unary_op(UnOp::Repr, value)
                        .ok()
                        .and_then(|repr| ctx.get_str(repr).map(str::to_string));
                }
            }
        } else {
            let _ = ctx.execute(&input, "<string>");
        }
        input.clear();
        indented = false;

        if let Some(text) = echo {
            println!("{text}");
        }

        if let Some(exc) = ctx.current_exception() {
            let is_system_exit = system_exit
                .is_some_and(|cls| ctx.isinstance_of(exc, &[cls]).is_some());
            if is_system_exit {
                return ExitCode::SUCCESS;
            }
            print!("{}", ctx.error_message());
            ctx.clear_exception();
        }
    }
}
