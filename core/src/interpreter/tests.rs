use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use crate::context::{PackagePaths, ServiceContext, ServiceIdentity};
use crate::error::WorkerError;
use crate::interpreter::Interpreter;
use crate::trace::MemorySink;

/* ===================== Test Helpers ===================== */

struct Fixture {
    dir: TempDir,
    ctx: Arc<ServiceContext>,
    sink: Arc<MemorySink>,
}

impl Fixture {
    fn new() -> Self {
        Self::with(|builder| builder)
    }

    fn with(
        configure: impl FnOnce(crate::context::ServiceContextBuilder) -> crate::context::ServiceContextBuilder,
    ) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = Arc::new(MemorySink::new());
        let identity = ServiceIdentity::new("TestService", dir.path());
        let ctx = configure(ServiceContext::builder(identity).sink(sink.clone())).build();
        Self { dir, ctx, sink }
    }

    fn script(&self, name: &str, source: &str) -> &Self {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create script dir");
        }
        std::fs::write(path, source).expect("write script");
        self
    }

    fn interpreter(&self) -> Interpreter {
        Interpreter::create(self.ctx.clone()).expect("create interpreter")
    }

    /// Load and execute `source` as `main.lua`
    fn run(&self, source: &str) -> (Interpreter, Result<(), WorkerError>) {
        self.script("main.lua", source);
        let mut interp = self.interpreter();
        interp.load("main.lua").expect("load main.lua");
        let outcome = interp.execute();
        (interp, outcome)
    }
}

/* ===================== Results ===================== */

#[test]
fn reads_mixed_results_in_order() {
    let fx = Fixture::new();
    let (interp, outcome) = fx.run("return 1, 'ok', {x=5}");
    outcome.unwrap();

    assert_eq!(interp.result_count(), Some(3));
    assert_eq!(interp.result_int(1), 1);
    assert_eq!(interp.result_string(2).as_deref(), Some("ok"));
    assert_eq!(interp.result_field_int(3, "x"), 5);
}

#[test]
fn reading_past_the_results_is_neutral() {
    let fx = Fixture::new();
    let (interp, outcome) = fx.run("return 7");
    outcome.unwrap();

    assert_eq!(interp.result_string(0), None);
    assert_eq!(interp.result_int(0), 0);
    assert_eq!(interp.result_string(2), None);
    assert_eq!(interp.result_int(2), 0);
    assert_eq!(interp.result_field_string(2, "x"), None);
    assert_eq!(interp.result_field_int(2, "x"), 0);
}

#[test]
fn numbers_and_strings_coerce_both_ways() {
    let fx = Fixture::new();
    let (interp, outcome) = fx.run("return 3.7, '12', '4.5', 42, true");
    outcome.unwrap();

    assert_eq!(interp.result_int(1), 3);
    assert_eq!(interp.result_int(2), 12);
    assert_eq!(interp.result_int(3), 4);
    assert_eq!(interp.result_string(4).as_deref(), Some("42"));
    assert_eq!(interp.result_string(5), None);
    assert_eq!(interp.result_int(5), 0);
}

#[test]
fn field_reads_need_a_table() {
    let fx = Fixture::new();
    let (interp, outcome) = fx.run("return 'plain', {name='svc', count='3'}");
    outcome.unwrap();

    assert_eq!(interp.result_field_string(1, "name"), None);
    assert_eq!(interp.result_field_string(2, "name").as_deref(), Some("svc"));
    assert_eq!(interp.result_field_int(2, "count"), 3);
    assert_eq!(interp.result_field_string(2, "missing"), None);
    assert!(interp.result_has_field(2, "name"));
    assert!(!interp.result_has_field(2, "missing"));
}

#[test]
fn nil_holes_keep_their_positions() {
    let fx = Fixture::new();
    let (interp, outcome) = fx.run("return 1, nil, 3");
    outcome.unwrap();

    assert_eq!(interp.result_count(), Some(3));
    assert_eq!(interp.result_string(2), None);
    assert_eq!(interp.result_int(3), 3);
}

#[test]
fn results_convert_to_json() {
    let fx = Fixture::new();
    let (interp, outcome) = fx.run("return 1, 'ok', {x=5}, print");
    outcome.unwrap();

    let json = interp.results_json();
    assert_eq!(json[0], serde_json::json!(1));
    assert_eq!(json[1], serde_json::json!("ok"));
    assert_eq!(json[2], serde_json::json!({"x": 5}));
    assert_eq!(json[3], serde_json::json!("<function>"));
}

/* ===================== Protocol ===================== */

#[test]
fn second_load_replaces_the_first() {
    let fx = Fixture::new();
    fx.script("first.lua", "print('first') return 1")
        .script("second.lua", "print('second') return 2");

    let mut interp = fx.interpreter();
    interp.load("first.lua").unwrap();
    interp.load("second.lua").unwrap();
    interp.execute().unwrap();

    assert_eq!(fx.sink.lines(), vec!["second"]);
    assert_eq!(interp.result_int(1), 2);
}

#[test]
fn execute_without_load_is_protocol_misuse() {
    let fx = Fixture::new();
    let mut interp = fx.interpreter();

    let err = interp.execute().unwrap_err();
    assert!(matches!(err, WorkerError::ProtocolMisuse(_)));
    assert_eq!(interp.result_count(), None);
}

#[test]
fn failed_load_leaves_nothing_to_run() {
    let fx = Fixture::new();
    fx.script("good.lua", "return 1").script("bad.lua", "return (");

    let mut interp = fx.interpreter();
    interp.load("good.lua").unwrap();
    let err = interp.load("bad.lua").unwrap_err();
    assert!(matches!(err, WorkerError::Compile { .. }));
    assert!(!interp.has_pending());

    let err = interp.execute().unwrap_err();
    assert!(matches!(err, WorkerError::ProtocolMisuse(_)));
}

#[test]
fn runtime_error_clears_the_previous_results() {
    let fx = Fixture::new();
    fx.script(
        "flaky.lua",
        "runs = (runs or 0) + 1\nif runs > 1 then error('boom') end\nreturn runs",
    );

    let mut interp = fx.interpreter();
    interp.load("flaky.lua").unwrap();
    interp.execute().unwrap();
    assert_eq!(interp.result_int(1), 1);

    let err = interp.execute().unwrap_err();
    let WorkerError::Runtime { traceback } = err else {
        unreachable!("expected a runtime error");
    };
    assert!(traceback.contains("boom"));
    assert!(traceback.contains("stack traceback:"));
    assert_eq!(interp.result_count(), None);
    assert_eq!(interp.result_int(1), 0);
}

#[test]
fn reassigned_xpcall_cannot_fake_the_next_execute() {
    let fx = Fixture::new();
    fx.script(
        "hijack.lua",
        "runs = (runs or 0) + 1\n\
         if runs > 1 then error('boom') end\n\
         xpcall = function() return true, 'faked' end\n\
         return 'real'",
    );

    let mut interp = fx.interpreter();
    interp.load("hijack.lua").unwrap();
    interp.execute().unwrap();
    assert_eq!(interp.result_string(1).as_deref(), Some("real"));

    let err = interp.execute().unwrap_err();
    assert!(err.to_string().contains("boom"));
    assert_eq!(interp.result_count(), None);
}

#[test]
fn missing_script_is_a_resource_error() {
    let fx = Fixture::new();
    let mut interp = fx.interpreter();

    let err = interp.load("nope.lua").unwrap_err();
    let WorkerError::Resource { message, .. } = err else {
        unreachable!("expected a resource error");
    };
    assert!(message.contains("nope.lua"));
}

#[test]
fn scripts_resolve_against_the_install_dir() {
    let fx = Fixture::new();
    fx.script("jobs/nightly.lua", "#!/usr/bin/env lua\nreturn 'nightly'");

    let mut interp = fx.interpreter();
    interp.load("jobs/nightly.lua").unwrap();
    interp.execute().unwrap();
    assert_eq!(interp.result_string(1).as_deref(), Some("nightly"));

    let err = interp.load("../outside.lua").unwrap_err();
    assert!(matches!(err, WorkerError::Resource { .. }));
}

/* ===================== Environment ===================== */

#[test]
fn environment_is_built_once() {
    let fx = Fixture::with(|b| b.trace_level(1));
    fx.script("a.lua", "return 1").script("b.lua", "return 2");

    let mut interp = fx.interpreter();
    interp.load("a.lua").unwrap();
    interp.load("b.lua").unwrap();
    interp.execute().unwrap();

    let inits = fx
        .sink
        .lines()
        .iter()
        .filter(|line| line.contains("Initialized Lua environment"))
        .count();
    assert_eq!(inits, 1);
}

#[test]
fn execute_traces_result_types() {
    let fx = Fixture::with(|b| b.trace_level(1));
    let (_interp, outcome) = fx.run("return 1, 'two'");
    outcome.unwrap();

    assert!(fx.sink.contains("Saved work result count: 2"));
    assert!(fx.sink.contains("item: integer"));
    assert!(fx.sink.contains("item: string"));
}

#[test]
fn debug_library_is_not_exposed() {
    let fx = Fixture::new();
    let (interp, outcome) = fx.run("return type(debug), type(string.format)");
    outcome.unwrap();

    assert_eq!(interp.result_string(1).as_deref(), Some("nil"));
    assert_eq!(interp.result_string(2).as_deref(), Some("function"));
}

#[test]
fn package_path_is_rooted_at_install_dir() {
    let fx = Fixture::with(|b| {
        b.package_paths(PackagePaths {
            lua_path: Some("lib/?.lua".to_string()),
            lua_cpath: None,
        })
    });
    fx.script("lib/helper.lua", "return { answer = 42 }");

    let (interp, outcome) = fx.run("return require('helper').answer");
    outcome.unwrap();
    assert_eq!(interp.result_int(1), 42);
}

#[test]
fn memory_limit_stops_runaway_allocation() {
    let fx = Fixture::with(|b| b.memory_limit(Some(2 * 1024 * 1024)));
    let (interp, outcome) = fx.run("local t = {} for i = 1, 1e8 do t[i] = ('x'):rep(64) .. i end");

    assert!(outcome.is_err());
    assert_eq!(interp.result_count(), None);
}

/* ===================== Script API ===================== */

#[test]
fn print_joins_arguments_with_tabs() {
    let fx = Fixture::new();
    let (_interp, outcome) = fx.run("print('a', 1, nil, true) service.print('again')");
    outcome.unwrap();

    assert_eq!(fx.sink.lines(), vec!["a\t1\tnil\ttrue", "again"]);
}

#[test]
fn stopping_flips_once_the_stop_arrives() {
    let fx = Fixture::new();
    fx.script("stopping.lua", "return service.stopping() and 1 or 0");

    let mut interp = fx.interpreter();
    interp.load("stopping.lua").unwrap();
    interp.execute().unwrap();
    assert_eq!(interp.result_int(1), 0);

    assert!(fx.ctx.stop_flag().request_stop());
    interp.execute().unwrap();
    assert_eq!(interp.result_int(1), 1);

    assert!(!fx.ctx.stop_flag().request_stop());
    interp.execute().unwrap();
    assert_eq!(interp.result_int(1), 1);
}

#[test]
fn tracelevel_updates_the_process_level() {
    let fx = Fixture::new();
    let (interp, outcome) = fx.run("service.tracelevel(2)");
    outcome.unwrap();

    assert_eq!(interp.result_string(1), None);
    assert_eq!(fx.ctx.trace_level(), 2);
}

#[test]
fn bare_globals_reach_the_service_functions() {
    let fx = Fixture::new();
    fx.script("globals.lua", "local before = stopping() and 1 or 0\ntracelevel(2)\nreturn before, tracelevel()");

    let mut interp = fx.interpreter();
    interp.load("globals.lua").unwrap();
    interp.execute().unwrap();
    assert_eq!(interp.result_int(1), 0);
    assert_eq!(interp.result_int(2), 2);
    assert_eq!(fx.ctx.trace_level(), 2);

    fx.ctx.stop_flag().request_stop();
    interp.execute().unwrap();
    assert_eq!(interp.result_int(1), 1);
}

#[test]
fn identity_is_read_only() {
    let fx = Fixture::new();
    let (interp, outcome) = fx.run("return service.name, service.path, service.display_name");
    outcome.unwrap();

    assert_eq!(interp.result_string(1).as_deref(), Some("TestService"));
    assert_eq!(interp.result_string(3).as_deref(), Some("TestService"));
    let path = interp.result_string(2).unwrap();
    assert!(path.ends_with(std::path::MAIN_SEPARATOR));
    assert!(Path::new(&path).starts_with(fx.dir.path()));

    let (_interp, outcome) = fx.run("service.name = 'other'");
    let err = outcome.unwrap_err();
    assert!(err.to_string().contains("service.name is read-only"));

    let (_interp, outcome) = fx.run("service.display_name = 'other'");
    let err = outcome.unwrap_err();
    assert!(err.to_string().contains("service.display_name is read-only"));

    let (interp, outcome) = fx.run("service.custom = 5 return service.custom");
    outcome.unwrap();
    assert_eq!(interp.result_int(1), 5);
}

#[test]
fn display_name_comes_from_the_identity() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("main.lua"), "return service.display_name").unwrap();
    let identity = ServiceIdentity::new("Poller", dir.path())
        .with_display_name(Some("Nightly Poller".to_string()));
    let ctx = ServiceContext::builder(identity)
        .sink(Arc::new(MemorySink::new()))
        .build();

    let mut interp = Interpreter::create(ctx).unwrap();
    interp.load("main.lua").unwrap();
    interp.execute().unwrap();
    assert_eq!(interp.result_string(1).as_deref(), Some("Nightly Poller"));
}

#[test]
fn current_directory_round_trips_through_scripts() {
    let fx = Fixture::new();
    let (interp, outcome) = fx.run("return service.GetCurrentDirectory()");
    outcome.unwrap();

    let cwd = std::env::current_dir().unwrap();
    assert_eq!(interp.result_string(1), Some(cwd.display().to_string()));
}

#[test]
fn platform_failures_raise_lua_errors() {
    let fx = Fixture::new();
    let (_interp, outcome) = fx.run("service.SetCurrentDirectory('/definitely/not/a/folder')");

    let err = outcome.unwrap_err();
    assert!(err.to_string().contains("SetCurrentDirectory failed ("));
}

#[test]
fn configuration_describes_this_service() {
    let fx = Fixture::with(|b| b.trace_level(1));
    let (interp, outcome) = fx.run(
        "local c = service.GetCurrentConfiguration()\n\
         return c, c.TagId",
    );
    outcome.unwrap();

    assert_eq!(interp.result_field_string(1, "name").as_deref(), Some("TestService"));
    assert_eq!(interp.result_field_int(1, "ServiceType"), 0x10);
    assert_eq!(interp.result_field_int(1, "StartType"), 0x3);
    assert_eq!(interp.result_string(2), None);
    assert!(fx.sink.contains("Get service configuration for TestService:"));
    assert!(fx.sink.contains("  ServiceType: 0x10"));
}

#[test]
fn configuration_of_unknown_service_fails() {
    let fx = Fixture::new();
    let (_interp, outcome) = fx.run("service.GetCurrentConfiguration('NoSuchService')");

    let err = outcome.unwrap_err();
    assert!(err.to_string().contains("OpenService failed (1060)"));
}
