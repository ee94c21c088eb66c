//! Playbook executor: hands each query to an external command.
//!
//! The query text is written to a temporary `.sql` file and the command is
//! invoked as `<program> <base args> --extra-vars db_name=<db> --extra-vars
//! sql_file=<path>`. The file is owned by one invocation and is removed
//! before `execute` returns, on every path.

use std::io::Write as _;
use std::process::Stdio;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::backend::{QueryExecutor, extract_message};
use crate::config::BackendConfig;
use crate::error::BackendError;

/// Runs queries through an Ansible-style playbook command.
#[derive(Debug, Clone)]
pub struct PlaybookExecutor {
    config: BackendConfig,
}

impl PlaybookExecutor {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    /// Write the query to an exclusively owned scratch file.
    fn write_scratch(&self, query: &str) -> Result<NamedTempFile, BackendError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("query-").suffix(".sql");
        let mut file = match &self.config.scratch_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(BackendError::ScratchFile)?;

        file.write_all(query.as_bytes())
            .and_then(|()| file.flush())
            .map_err(BackendError::ScratchFile)?;
        Ok(file)
    }

    fn command(&self, database: &str, scratch: &NamedTempFile) -> Command {
        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.base_args)
            .arg("--extra-vars")
            .arg(format!("db_name={database}"))
            .arg("--extra-vars")
            .arg(format!("sql_file={}", scratch.path().display()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        command
    }

    /// Spawn the backend and collect its combined output and exit code.
    async fn run(&self, mut command: Command) -> Result<(String, Option<i32>), BackendError> {
        let mut child = command.spawn().map_err(|source| BackendError::Spawn {
            program: self.config.program.clone(),
            source,
        })?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let collect = async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let read_out = async {
                match stdout_pipe.as_mut() {
                    Some(out) => out.read_to_end(&mut stdout).await.map(|_| ()),
                    None => Ok(()),
                }
            };
            let read_err = async {
                match stderr_pipe.as_mut() {
                    Some(err) => err.read_to_end(&mut stderr).await.map(|_| ()),
                    None => Ok(()),
                }
            };
            let (out_res, err_res) = tokio::join!(read_out, read_err);
            out_res?;
            err_res?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((
                combine_output(
                    &String::from_utf8_lossy(&stdout),
                    &String::from_utf8_lossy(&stderr),
                ),
                status.code(),
            ))
        };

        let result = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, collect).await {
                Ok(result) => result,
                Err(_) => return Err(BackendError::TimedOut(limit)),
            },
            None => collect.await,
        };

        result.map_err(BackendError::Io)
    }
}

#[async_trait]
impl QueryExecutor for PlaybookExecutor {
    fn name(&self) -> &str {
        &self.config.program
    }

    async fn execute(&self, database: &str, query: &str) -> Result<String, BackendError> {
        let scratch = self.write_scratch(query)?;
        debug!(
            database,
            sql_file = %scratch.path().display(),
            program = %self.config.program,
            "Running backend"
        );

        let outcome = self.run(self.command(database, &scratch)).await;

        if let Err(e) = scratch.close() {
            warn!(error = %e, "Failed to remove query scratch file");
        }

        let (output, code) = outcome?;
        if code != Some(0) {
            return Err(BackendError::Exited { code, output });
        }
        Ok(extract_message(&output))
    }
}

/// Merge stdout and stderr into one text block.
fn combine_output(stdout: &str, stderr: &str) -> String {
    if stderr.trim().is_empty() {
        stdout.to_string()
    } else if stdout.trim().is_empty() {
        stderr.to_string()
    } else {
        format!("{stdout}\n\n--- stderr ---\n{stderr}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_prefers_non_empty_stream() {
        assert_eq!(combine_output("out", ""), "out");
        assert_eq!(combine_output("", "err"), "err");
        assert_eq!(combine_output("out", " \n"), "out");
        assert_eq!(combine_output("out", "err"), "out\n\n--- stderr ---\nerr");
    }

    #[test]
    fn command_line_layout() {
        let executor = PlaybookExecutor::new(BackendConfig::default());
        let scratch = executor.write_scratch("SELECT 1;").unwrap();
        let command = executor.command("orders", &scratch);
        let std_cmd = command.as_std();
        let args: Vec<String> = std_cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(std_cmd.get_program(), "ansible-playbook");
        assert_eq!(
            args[..5],
            [
                "-i",
                "hosts.ini",
                "playbooks/run_query.yml",
                "--extra-vars",
                "db_name=orders"
            ]
        );
        assert_eq!(args[5], "--extra-vars");
        assert_eq!(args[6], format!("sql_file={}", scratch.path().display()));
    }

    #[test]
    fn scratch_file_holds_query() {
        let executor = PlaybookExecutor::new(BackendConfig::default());
        let scratch = executor.write_scratch("UPDATE t SET x = 1;").unwrap();
        let contents = std::fs::read_to_string(scratch.path()).unwrap();
        assert_eq!(contents, "UPDATE t SET x = 1;");
        assert!(scratch.path().extension().is_some_and(|e| e == "sql"));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let executor = PlaybookExecutor::new(BackendConfig {
            program: "definitely-not-a-real-backend-binary".into(),
            base_args: vec![],
            scratch_dir: Some(dir.path().to_path_buf()),
            ..BackendConfig::default()
        });
        let err = executor.execute("orders", "SELECT 1").await.unwrap_err();
        assert!(matches!(err, BackendError::Spawn { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
