//! Per-step script emission: the recipe body wrapper (`script`) and the
//! sandboxed/verbosity-aware runner (`<phase>.sh`).
//!
//! Byte-stability of the emitted `script` matters (two runs with identical
//! inputs should emit an identical file) so every associative-map literal
//! below is built from a sorted iteration rather than a hash map's
//! unspecified order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kiln_graph::{Graph, StepId};

use crate::context::BuildContext;
use crate::error::{EngineError, Result};

const RUN_TEMPLATE: &str = r#"#!/bin/bash

on_exit()
{
     if [[ -n "$_sandbox" ]] ; then
          if [[ $_keep_sandbox = 0 ]] ; then
                rm -rf "$_sandbox"
          else
                echo "Keeping sandbox in $_sandbox" >&2
          fi
     fi
}

run()
{
    __SANDBOX_CMD__ "$@"
}

run_script()
{
    local ret=0 trace=""
    if [[ $_verbose -ge 3 ]] ; then trace="-x" ; fi

    echo "### START: `date`"
    run /bin/bash $trace -- ../script __ARGS__
    ret=$?
    echo "### END($ret): `date`"

    return $ret
}

_keep_env=0
_verbose=1
_sandbox=__SANDBOX_SETUP__
_keep_sandbox=0
_args=`getopt -o kqvE -- "$@"`
if [ $? != 0 ] ; then echo "Args parsing failed..." >&2 ; exit 1 ; fi
eval set -- "$_args"

_args=( )
while true ; do
    case "$1" in
        -k) _keep_sandbox=1 ;;
        -q) : $(( _verbose-- )) ;;
        -v) : $(( _verbose++ )) ;;
        -E) _keep_env=1 ;;
        --) shift ; break ;;
        *) echo "Internal error!" ; exit 1 ;;
    esac
    _args+=("$1")
    shift
done

if [[ $# -gt 1 ]] ; then
    echo "Unexpected arguments!" >&2
    exit 1
fi

trap on_exit EXIT

case "${1:-run}" in
    run)
        if [[ $_keep_env = 1 ]] ; then
            exec "$0" "${_args[@]}" __run
        else
            exec /usr/bin/env -i __WHITELIST__ "$0" "${_args[@]}" __run
        fi
        ;;
    __run)
        cd "${0%/*}/workspace"
        case "$_verbose" in
            0)
                run_script >> ../log.txt 2>&1
                ;;
            1)
                set -o pipefail
                {
                    {
                        run_script | tee -a ../log.txt
                    } 3>&1 1>&2- 2>&3- | tee -a ../log.txt
                } 1>&2- 2>/dev/null
                ;;
            *)
                set -o pipefail
                {
                    {
                        run_script | tee -a ../log.txt
                    } 3>&1 1>&2- 2>&3- | tee -a ../log.txt
                } 3>&1 1>&2- 2>&3-
                ;;
        esac
        ;;
    shell)
        if [[ $_keep_env = 1 ]] ; then
            exec /usr/bin/env __ENV__ "$0" "${_args[@]}" __shell
        else
            exec /usr/bin/env -i __WHITELIST__ "$0" "${_args[@]}" __shell
        fi
        ;;
    __shell)
        cd "${0%/*}/workspace"
        if [[ $_keep_env = 1 ]] ; then
            run /bin/bash -s __ARGS__
        else
            run /bin/bash --norc -s __ARGS__
        fi
        ;;
    *)
        echo "Unknown command" ; exit 1 ;;
esac
"#;

/// Quote `s` the way POSIX shells require, matching the behavior of
/// Python's `pipes.quote`/`shlex.quote`: unquoted if already shell-safe,
/// single-quoted (with embedded quotes escaped) otherwise.
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b'/' | b'@' | b'%' | b'+' | b'='));
    if safe {
        s.to_owned()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

fn quote_path(p: &Path) -> String {
    shell_quote(&p.to_string_lossy())
}

struct StepEnv {
    vars: BTreeMap<String, String>,
}

/// Compute the step's own environment overlay: `PATH`, `LD_LIBRARY_PATH`,
/// `BOB_CWD`, plus the recipe's declared vars.
fn compute_step_env(ctx: &BuildContext, graph: &Graph, step_id: StepId) -> StepEnv {
    let step = graph.step(step_id);
    let mut vars: BTreeMap<String, String> = step.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

    let path = step
        .paths
        .iter()
        .map(|p| ctx.exec_base_dir.join(p).to_string_lossy().into_owned())
        .chain(ctx.global_paths.iter().cloned())
        .collect::<Vec<_>>()
        .join(":");
    vars.insert("PATH".to_owned(), path);

    let ld_path = step
        .library_paths
        .iter()
        .map(|p| ctx.exec_base_dir.join(p).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(":");
    vars.insert("LD_LIBRARY_PATH".to_owned(), ld_path);

    vars.insert(
        "BOB_CWD".to_owned(),
        ctx.exec_base_dir.join(step.exec_path()).to_string_lossy().into_owned(),
    );

    StepEnv { vars }
}

/// Build the sandbox command prefix (empty if sandboxing is disabled):
/// namespace-sandbox binary, `-S`/`-W`/`-H bob`/`-d /tmp`, the
/// `work/_sandbox` per-entry bind mounts, recipe-declared mounts, a
/// read-only bind of the workspace's parent onto the exec path's parent,
/// and a bind per dependency step.
fn sandbox_command(
    ctx: &BuildContext,
    graph: &Graph,
    step_id: StepId,
    sandbox_mounts: &BTreeMap<PathBuf, PathBuf>,
) -> Result<Vec<String>> {
    if !ctx.sandbox_enabled {
        return Ok(Vec::new());
    }
    let step = graph.step(step_id);
    let mut cmd = vec![quote_path(&ctx.bob_root.join("bin").join("namespace-sandbox"))];
    cmd.push("-S".to_owned());
    cmd.push("\"$_sandbox\"".to_owned());
    cmd.push("-W".to_owned());
    cmd.push(quote_path(&ctx.exec_base_dir.join(step.exec_path())));
    cmd.push("-H".to_owned());
    cmd.push("bob".to_owned());
    cmd.push("-d".to_owned());
    cmd.push("/tmp".to_owned());

    let sandbox_dir = ctx.workspace_base_dir.join("work").join("_sandbox");
    let mut entries = std::fs::read_dir(&sandbox_dir)
        .map_err(|source| EngineError::Io { path: sandbox_dir.clone(), source })?
        .map(|e| e.map(|e| e.file_name()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|source| EngineError::Io { path: sandbox_dir.clone(), source })?;
    entries.sort();
    for name in entries {
        cmd.push("-M".to_owned());
        cmd.push(quote_path(&sandbox_dir.join(&name)));
        cmd.push("-m".to_owned());
        cmd.push(format!("/{}", PathBuf::from(name).display()));
    }

    for (host, sandboxed) in sandbox_mounts {
        cmd.push("-M".to_owned());
        cmd.push(quote_path(host));
        if host != sandboxed {
            cmd.push("-m".to_owned());
            cmd.push(quote_path(sandboxed));
        }
    }

    let workspace_parent = step.workspace_path().parent().unwrap_or(Path::new("."));
    let exec_parent = step.exec_path().parent().unwrap_or(Path::new("."));
    cmd.push("-M".to_owned());
    cmd.push(quote_path(&ctx.workspace_base_dir.join(workspace_parent)));
    cmd.push("-w".to_owned());
    cmd.push(quote_path(&ctx.exec_base_dir.join(exec_parent)));

    for &dep_id in &step.all_dep_steps {
        let dep = graph.step(dep_id);
        if !dep.is_valid() {
            continue;
        }
        cmd.push("-M".to_owned());
        cmd.push(quote_path(&ctx.workspace_base_dir.join(dep.workspace_path())));
        cmd.push("-m".to_owned());
        cmd.push(quote_path(&ctx.exec_base_dir.join(dep.exec_path())));
    }

    cmd.push("--".to_owned());
    Ok(cmd)
}

/// Write `script` and `<phase>.sh` next to `step`'s workspace. Returns the
/// wrapper script's absolute path.
pub fn write_scripts(
    ctx: &BuildContext,
    graph: &Graph,
    step_id: StepId,
    phase: &str,
    sandbox_mounts: &BTreeMap<PathBuf, PathBuf>,
) -> Result<PathBuf> {
    let step = graph.step(step_id);
    let workspace_path = step.workspace_path().to_owned();
    let sibling = workspace_path.parent().expect("workspace_path always has a parent").to_owned();
    std::fs::create_dir_all(&sibling).map_err(|source| EngineError::Io { path: sibling.clone(), source })?;

    let step_env = compute_step_env(ctx, graph, step_id);

    let args = step
        .arguments
        .iter()
        .map(|a| quote_path(&ctx.exec_base_dir.join(graph.step(*a).exec_path())))
        .collect::<Vec<_>>()
        .join(" ");

    let whitelist = ctx
        .env_white_list
        .iter()
        .map(|name| format!("${{{name}+{name}=\"${name}\"}}"))
        .collect::<Vec<_>>()
        .join(" ");

    let env_for_shell = step_env
        .vars
        .iter()
        .map(|(k, v)| format!("{k}={}", shell_quote(v)))
        .collect::<Vec<_>>()
        .join(" ");

    let sandbox_setup = if ctx.sandbox_enabled { "\"$(mktemp -d)\"".to_owned() } else { String::new() };
    let sandbox_cmd = sandbox_command(ctx, graph, step_id, sandbox_mounts)?.join(" ");

    let run_file_name = format!("{phase}.sh");
    let wrapper = RUN_TEMPLATE
        .replace("__SANDBOX_CMD__", &sandbox_cmd)
        .replace("__ARGS__", &args)
        .replace("__SANDBOX_SETUP__", &sandbox_setup)
        .replace("__WHITELIST__", &whitelist)
        .replace("__ENV__", &env_for_shell);

    let wrapper_path = sibling.join(&run_file_name);
    std::fs::write(&wrapper_path, wrapper).map_err(|source| EngineError::Io { path: wrapper_path.clone(), source })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        std::fs::set_permissions(&wrapper_path, std::fs::Permissions::from_mode(0o775))
            .map_err(|source| EngineError::Io { path: wrapper_path.clone(), source })?;
    }

    let script_path = sibling.join("script");
    let script_body = render_script(ctx, graph, step_id, &step_env);
    std::fs::write(&script_path, script_body).map_err(|source| EngineError::Io { path: script_path.clone(), source })?;

    Ok(wrapper_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{NameFormatter, apply as apply_formatter};
    use kiln_graph::{add_package, StepSpec};
    use kiln_state::StateStore;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn one_package_graph() -> (Graph, kiln_graph::PackageId) {
        let mut graph = Graph::new();
        let pkg = add_package(
            &mut graph,
            "libfoo",
            StepSpec::new(kiln_hash::sha1_bytes(b"checkout")).with_script("echo checkout\n"),
            StepSpec::new(kiln_hash::sha1_bytes(b"build")).with_script("make\n"),
            StepSpec::new(kiln_hash::sha1_bytes(b"package")).with_script("echo package\n"),
            Vec::new(),
        );
        (graph, pkg)
    }

    fn test_context(dir: &TempDir, sandbox_enabled: bool) -> BuildContext {
        let state = StateStore::open(&dir.path().join("state.json")).unwrap();
        let mut ctx = BuildContext::new(
            state,
            0,
            false,
            false,
            false,
            false,
            BTreeSet::from(["PATH".to_string(), "HOME".to_string()]),
            vec!["/usr/bin".to_string()],
            sandbox_enabled,
            dir.path().to_owned(),
            false,
        );
        if sandbox_enabled {
            std::fs::create_dir_all(dir.path().join("work/_sandbox")).unwrap();
        }
        ctx.workspace_base_dir = dir.path().to_owned();
        ctx
    }

    #[test]
    fn shell_quote_leaves_safe_strings_bare() {
        assert_eq!(shell_quote("/usr/bin"), "/usr/bin");
        assert_eq!(shell_quote("FOO_BAR-1.0"), "FOO_BAR-1.0");
    }

    #[test]
    fn shell_quote_escapes_unsafe_strings() {
        assert_eq!(shell_quote("it's odd"), "'it'\\''s odd'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn rendered_script_sorts_dep_and_tool_maps() {
        let dir = TempDir::new().unwrap();
        let mut ctx = test_context(&dir, false);
        let (mut graph, pkg) = one_package_graph();
        let formatter = NameFormatter::release(dir.path().to_owned(), false);
        apply_formatter(&mut graph, &formatter, &mut ctx.state).unwrap();

        let build_step = graph.package(pkg).build;
        graph.step_mut(build_step).tools.insert("zig".to_string(), "tools/zig".to_string());
        graph.step_mut(build_step).tools.insert("awk".to_string(), "tools/awk".to_string());

        let wrapper_path = write_scripts(&ctx, &graph, build_step, "build", &BTreeMap::new()).unwrap();
        let script_path = wrapper_path.with_file_name("script");
        let script_body = std::fs::read_to_string(script_path).unwrap();

        let awk_pos = script_body.find("[awk]").unwrap();
        let zig_pos = script_body.find("[zig]").unwrap();
        assert!(awk_pos < zig_pos, "tool map entries must be sorted");
        assert!(script_body.contains("# BEGIN BUILD SCRIPT\nmake\n# END BUILD SCRIPT"));
    }

    #[test]
    fn sandbox_command_includes_recipe_declared_mounts() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir, true);
        let (mut graph, pkg) = one_package_graph();
        let mut state = StateStore::open(&dir.path().join("fmt-state.json")).unwrap();
        let formatter = NameFormatter::release(dir.path().to_owned(), true);
        apply_formatter(&mut graph, &formatter, &mut state).unwrap();

        let build_step = graph.package(pkg).build;
        let mut mounts = BTreeMap::new();
        mounts.insert(PathBuf::from("/host/ccache"), PathBuf::from("/ccache"));

        let cmd = sandbox_command(&ctx, &graph, build_step, &mounts).unwrap();
        let joined = cmd.join(" ");
        assert!(joined.contains("/host/ccache"));
        assert!(joined.contains("/ccache"));
        assert!(joined.ends_with("--"));
    }

    #[test]
    fn sandbox_disabled_yields_empty_command() {
        let dir = TempDir::new().unwrap();
        let mut ctx = test_context(&dir, false);
        let (mut graph, pkg) = one_package_graph();
        let formatter = NameFormatter::release(dir.path().to_owned(), false);
        apply_formatter(&mut graph, &formatter, &mut ctx.state).unwrap();
        let build_step = graph.package(pkg).build;
        let cmd = sandbox_command(&ctx, &graph, build_step, &BTreeMap::new()).unwrap();
        assert!(cmd.is_empty());
    }
}

fn render_script(ctx: &BuildContext, graph: &Graph, step_id: StepId, step_env: &StepEnv) -> String {
    let step = graph.step(step_id);
    let mut out = String::new();
    out.push_str("set -o errtrace\n");
    out.push_str("set -o nounset\n");
    out.push_str(
        "trap 'RET=$? ; echo \"Step failed on line ${LINENO}: Exit status ${RET}; Command: ${BASH_COMMAND}\" >&2 ; exit $RET' ERR\n",
    );
    out.push_str("trap 'for i in \"${_BOB_TMP_CLEANUP[@]-}\" ; do rm -f \"$i\" ; done' EXIT\n\n");

    out.push_str("# Special args:\n");
    let dep_entries = step
        .all_dep_steps
        .iter()
        .map(|s| {
            let dep = graph.step(*s);
            let pkg_name = graph.package(dep.package).name.clone();
            (pkg_name, ctx.exec_base_dir.join(dep.exec_path()))
        })
        .collect::<std::collections::BTreeMap<_, _>>();
    let dep_pairs = dep_entries
        .iter()
        .map(|(name, exec_path)| format!("[{}]={}", shell_quote(name), quote_path(exec_path)))
        .collect::<Vec<_>>()
        .join(" ");
    out.push_str(&format!("declare -A BOB_DEP_PATHS=( {dep_pairs} )\n"));

    let tool_pairs = step
        .tools
        .iter()
        .map(|(name, path)| format!("[{}]={}", shell_quote(name), shell_quote(&ctx.exec_base_dir.join(path).to_string_lossy())))
        .collect::<Vec<_>>()
        .join(" ");
    out.push_str(&format!("declare -A BOB_TOOL_PATHS=( {tool_pairs} )\n"));

    out.push_str("# Environment:\n");
    for (k, v) in &step_env.vars {
        out.push_str(&format!("export {k}={}\n", shell_quote(v)));
    }
    out.push('\n');

    out.push_str("# BEGIN BUILD SCRIPT\n");
    out.push_str(&step.script);
    if !step.script.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("# END BUILD SCRIPT\n");
    out
}

