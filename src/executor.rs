// src/executor.rs

//! Plan execution
//!
//! Shows the plan, checks that the environment can be written, asks for
//! confirmation, hands the plan to the interpreter, and records the command
//! in the history log.

use crate::config::Config;
use crate::environment::{Environment, append_env};
use crate::error::{Error, Result};
use crate::history::History;
use crate::index::Index;
use crate::interpreter::InstructionInterpreter;
use crate::orchestrator::{Command, Outcome};
use crate::plan::{ActionPlan, render_plan};
use crate::spec::MatchSpec;
use tracing::{debug, info};

/// Confirmation capability
///
/// `show_plan` receives the human-readable plan before anything else
/// happens; `confirm` is only asked when the run is neither a dry run nor
/// pre-approved.
pub trait Confirm {
    fn show_plan(&self, _summary: &str) {}

    fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Approves everything without asking
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysYes;

impl Confirm for AlwaysYes {
    fn confirm(&self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

/// How one plan is executed
#[derive(Debug, Clone, Copy)]
pub struct ExecuteOptions {
    pub command: Command,
    pub dry_run: bool,
    pub yes: bool,
    /// Skip the history line (`update --all`)
    pub skip_history: bool,
}

/// Keep lock failures distinct; everything else the interpreter reports is
/// an execution failure
pub fn classify_execution_error(err: Error) -> Error {
    match err {
        Error::AlreadyLocked(_) | Error::ExecutionFailure(_) => err,
        other => Error::ExecutionFailure(other.to_string()),
    }
}

pub fn execute_plan(
    config: &Config,
    plan: ActionPlan,
    index: &Index,
    specs: &[MatchSpec],
    options: ExecuteOptions,
    interpreter: &dyn InstructionInterpreter,
    confirm: &dyn Confirm,
) -> Result<Outcome> {
    let env = Environment::new(&plan.prefix);

    let summary = format!(
        "\nPackage plan for installation in environment {}:\n{}",
        plan.prefix.display(),
        render_plan(&plan, index, config.show_channel_urls)
    );
    confirm.show_plan(&summary);

    if matches!(options.command, Command::Install | Command::Update) {
        env.check_write()?;
    }

    if options.dry_run {
        debug!("Dry run, not executing");
        return Ok(Outcome::DryRun(plan));
    }

    if !(options.yes || config.always_yes) && !confirm.confirm("Proceed")? {
        info!("Declined, nothing was changed");
        return Ok(Outcome::Aborted);
    }

    interpreter
        .execute(&plan, index)
        .map_err(classify_execution_error)?;

    if !options.skip_history {
        History::new(&env).append_command(options.command.as_str(), specs)?;
    }
    if options.command == Command::Create {
        append_env(config, &plan.prefix);
    }

    Ok(Outcome::Executed(plan))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Instruction;
    use std::cell::{Cell, RefCell};
    use std::fs;

    #[derive(Default)]
    struct Recorder {
        calls: Cell<usize>,
        fail_with: RefCell<Option<Error>>,
    }

    impl InstructionInterpreter for Recorder {
        fn execute(&self, _plan: &ActionPlan, _index: &Index) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            match self.fail_with.borrow_mut().take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    struct Decline;

    impl Confirm for Decline {
        fn confirm(&self, _prompt: &str) -> Result<bool> {
            Ok(false)
        }
    }

    fn setup() -> (tempfile::TempDir, Config, ActionPlan) {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(temp_dir.path());
        let prefix = temp_dir.path().join("env");
        fs::create_dir_all(prefix.join("conda-meta")).unwrap();
        let mut plan = ActionPlan::new(&prefix);
        plan.push(Instruction::Link, "foo-1.0-0");
        (temp_dir, config, plan)
    }

    fn options(command: Command) -> ExecuteOptions {
        ExecuteOptions {
            command,
            dry_run: false,
            yes: false,
            skip_history: false,
        }
    }

    #[test]
    fn test_executes_and_records_history() {
        let (_temp_dir, config, plan) = setup();
        let history = plan.prefix.join("conda-meta/history");
        let recorder = Recorder::default();
        let specs = vec![MatchSpec::name_only("foo")];

        let outcome = execute_plan(
            &config,
            plan,
            &Index::new(),
            &specs,
            options(Command::Install),
            &recorder,
            &AlwaysYes,
        )
        .unwrap();

        assert!(matches!(outcome, Outcome::Executed(_)));
        assert_eq!(recorder.calls.get(), 1);
        assert_eq!(fs::read_to_string(history).unwrap(), "# install specs: ['foo']\n");
    }

    #[test]
    fn test_dry_run_and_decline_do_not_execute() {
        let (_temp_dir, config, plan) = setup();
        let recorder = Recorder::default();

        let mut dry = options(Command::Install);
        dry.dry_run = true;
        let outcome =
            execute_plan(&config, plan.clone(), &Index::new(), &[], dry, &recorder, &Decline).unwrap();
        assert!(matches!(outcome, Outcome::DryRun(_)));

        let outcome = execute_plan(
            &config,
            plan,
            &Index::new(),
            &[],
            options(Command::Install),
            &recorder,
            &Decline,
        )
        .unwrap();
        assert!(matches!(outcome, Outcome::Aborted));
        assert_eq!(recorder.calls.get(), 0);
    }

    #[test]
    fn test_interpreter_errors_are_classified() {
        let (_temp_dir, config, plan) = setup();
        let recorder = Recorder::default();

        *recorder.fail_with.borrow_mut() = Some(Error::AlreadyLocked("lock".to_string()));
        let err = execute_plan(
            &config,
            plan.clone(),
            &Index::new(),
            &[],
            options(Command::Install),
            &recorder,
            &AlwaysYes,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "AlreadyLocked");

        *recorder.fail_with.borrow_mut() = Some(Error::Internal("boom".to_string()));
        let err = execute_plan(
            &config,
            plan,
            &Index::new(),
            &[],
            options(Command::Install),
            &recorder,
            &AlwaysYes,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "ExecutionFailure");
    }
}
