//! The `os` module, registered only when `enable_os_access` is set.

use crate::{
    builtins::{expect_count, str_arg},
    context::Context,
    exceptions::{ExcKind, RunResult},
    heap::ObjId,
};

use super::{constant_str, function};

fn raise_os_error(ctx: &mut Context, error: &std::io::Error) -> crate::exceptions::Raised {
    ctx.raise_kind(ExcKind::OSError, &error.to_string())
}

fn os_getcwd(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 0)?;
    match std::env::current_dir() {
        Ok(path) => {
            let text = path.to_string_lossy().into_owned();
            ctx.new_str(&text)
        }
        Err(e) => Err(raise_os_error(ctx, &e)),
    }
}

fn os_chdir(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let path = str_arg(ctx, argv, 0)?;
    match std::env::set_current_dir(&path) {
        Ok(()) => Ok(ctx.none()),
        Err(e) => Err(raise_os_error(ctx, &e)),
    }
}

fn os_mkdir(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let path = str_arg(ctx, argv, 0)?;
    match std::fs::create_dir(&path) {
        Ok(()) => Ok(ctx.none()),
        Err(e) => Err(raise_os_error(ctx, &e)),
    }
}

fn os_makedirs(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let path = str_arg(ctx, argv, 0)?;
    match std::fs::create_dir_all(&path) {
        Ok(()) => Ok(ctx.none()),
        Err(e) => Err(raise_os_error(ctx, &e)),
    }
}

fn os_remove(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let path = str_arg(ctx, argv, 0)?;
    if std::fs::metadata(&path).map(|m| m.is_dir()).unwrap_or(false) {
        return Err(ctx.raise_kind(ExcKind::IsADirectoryError, &path));
    }
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(ctx.none()),
        Err(e) => Err(raise_os_error(ctx, &e)),
    }
}

fn os_rmdir(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 1)?;
    let path = str_arg(ctx, argv, 0)?;
    match std::fs::remove_dir(&path) {
        Ok(()) => Ok(ctx.none()),
        Err(e) => Err(raise_os_error(ctx, &e)),
    }
}

fn os_rename(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    expect_count(ctx, argv, 2)?;
    let from = str_arg(ctx, argv, 0)?;
    let to = str_arg(ctx, argv, 1)?;
    match std::fs::rename(&from, &to) {
        Ok(()) => Ok(ctx.none()),
        Err(e) => Err(raise_os_error(ctx, &e)),
    }
}

fn os_listdir(ctx: &mut Context, argv: &[ObjId]) -> RunResult<ObjId> {
    if argv.len() > 1 {
        return Err(crate::builtins::arg_count_error(ctx, argv.len(), None));
    }
    let path = if argv.is_empty() {
        ".".to_string()
    } else {
        str_arg(ctx, argv, 0)?
    };

    let entries = match std::fs::read_dir(&path) {
        Ok(entries) => entries,
        Err(e) => return Err(raise_os_error(ctx, &e)),
    };
    let names: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();

    let protect_base = ctx.protected.len();
    let mut items = Vec::with_capacity(names.len());
    for name in &names {
        match ctx.new_str(name) {
            Ok(item) => {
                ctx.protected.push(item);
                items.push(item);
            }
            Err(raised) => {
                ctx.protected.truncate(protect_base);
                return Err(raised);
            }
        }
    }
    let list = ctx.new_list(&items);
    ctx.protected.truncate(protect_base);
    list
}

pub(crate) fn import(ctx: &mut Context) -> RunResult<()> {
    function(ctx, "getcwd", os_getcwd)?;
    function(ctx, "chdir", os_chdir)?;
    function(ctx, "mkdir", os_mkdir)?;
    function(ctx, "makedirs", os_makedirs)?;
    function(ctx, "remove", os_remove)?;
    function(ctx, "rmdir", os_rmdir)?;
    function(ctx, "rename", os_rename)?;
    function(ctx, "listdir", os_listdir)?;

    if cfg!(windows) {
        constant_str(ctx, "sep", "\\")?;
        constant_str(ctx, "linesep", "\r\n")?;
    } else {
        constant_str(ctx, "sep", "/")?;
        constant_str(ctx, "linesep", "\n")?;
    }
    Ok(())
}
