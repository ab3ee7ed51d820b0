//! 代码沙箱：LLM 生成小程序，在子进程中带超时执行，失败时把错误反馈给模型重写
//!
//! CodeRunner 负责执行（ProcessRunner 调用解释器 `-c`），CodeSandbox 负责「生成 → 执行 → 反馈」的有限次循环。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::process::Command;

use crate::core::{AgentError, TaskContext};
use crate::llm::{ObjectGenerator, ToolName};
use crate::memory::Message;

/// 代码执行器
#[async_trait]
pub trait CodeRunner: Send + Sync {
    /// 执行代码并返回 stdout；非零退出、超时等返回 Sandbox 错误
    async fn run(&self, code: &str) -> Result<String, AgentError>;

    /// 生成代码时告诉模型的语言
    fn language(&self) -> &str {
        "python"
    }
}

/// 子进程执行器：`<interpreter> -c <code>`
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    interpreter: String,
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(interpreter: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl CodeRunner for ProcessRunner {
    async fn run(&self, code: &str) -> Result<String, AgentError> {
        let child = Command::new(&self.interpreter)
            .arg("-c")
            .arg(code)
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| AgentError::Sandbox(format!("execution timed out after {:?}", self.timeout)))?
            .map_err(|e| AgentError::Sandbox(format!("failed to spawn {}: {}", self.interpreter, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::Sandbox(format!(
                "exit status {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if stdout.is_empty() {
            return Err(AgentError::Sandbox(
                "no output, the program must print its result".into(),
            ));
        }
        Ok(stdout)
    }

    fn language(&self) -> &str {
        if self.interpreter.contains("node") {
            "javascript"
        } else if self.interpreter.ends_with("sh") {
            "shell"
        } else {
            "python"
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GeneratedCode {
    /// Short explanation of the approach
    think: String,
    /// A complete, self-contained program that prints the final result to stdout
    code: String,
}

/// 沙箱执行结果
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSolution {
    pub code: String,
    pub output: String,
}

/// 代码沙箱
pub struct CodeSandbox {
    generator: ObjectGenerator,
    runner: Arc<dyn CodeRunner>,
    max_attempts: u32,
}

impl CodeSandbox {
    pub fn new(generator: ObjectGenerator, runner: Arc<dyn CodeRunner>, max_attempts: u32) -> Self {
        Self {
            generator,
            runner,
            max_attempts: max_attempts.max(1),
        }
    }

    fn prompt(&self, problem: &str, context: &str, previous: &[(String, String)]) -> String {
        let mut prompt = format!(
            "You are an expert {lang} programmer. Write a small, self-contained {lang} program that solves the problem below.\n\
             Rules:\n- Use only the standard library.\n- Hard-code the input values you need from the context.\n\
             - Print only the final result to stdout.\n\n<problem>\n{problem}\n</problem>\n",
            lang = self.runner.language(),
            problem = problem
        );
        if !context.trim().is_empty() {
            prompt.push_str(&format!("\n<context>\n{}\n</context>\n", context));
        }
        if !previous.is_empty() {
            prompt.push_str("\nPrevious attempts failed, avoid the same mistakes:\n");
            for (code, err) in previous {
                prompt.push_str(&format!("<attempt>\n{}\n</attempt>\n<error>\n{}\n</error>\n", code, err));
            }
        }
        prompt
    }

    /// 最多 max_attempts 次生成并执行；全部失败时返回最后一次错误
    pub async fn solve(
        &self,
        ctx: &TaskContext,
        problem: &str,
        context: &str,
    ) -> Result<SandboxSolution, AgentError> {
        let mut previous: Vec<(String, String)> = Vec::new();
        let mut last_err = AgentError::Sandbox("no attempt made".into());
        for attempt in 1..=self.max_attempts {
            let prompt = self.prompt(problem, context, &previous);
            let generated: GeneratedCode = match self
                .generator
                .generate(ctx, ToolName::CodeGenerator, &prompt, &[Message::user(problem)])
                .await
            {
                Ok(g) => g,
                Err(e) => {
                    last_err = e;
                    continue;
                }
            };
            tracing::debug!(attempt, think = %generated.think, "Generated code");
            match self.runner.run(&generated.code).await {
                Ok(output) => {
                    tracing::info!(attempt, "Coding problem solved");
                    return Ok(SandboxSolution {
                        code: generated.code,
                        output,
                    });
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Generated code failed");
                    previous.push((generated.code, e.to_string()));
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmClient, ScriptedLlmClient, ToolModels};
    use crate::memory::TokenTracker;
    use std::sync::Mutex;

    struct FakeRunner {
        outputs: Mutex<Vec<Result<String, AgentError>>>,
    }

    #[async_trait]
    impl CodeRunner for FakeRunner {
        async fn run(&self, _code: &str) -> Result<String, AgentError> {
            self.outputs.lock().unwrap().remove(0)
        }
    }

    fn generator() -> ObjectGenerator {
        let client: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new(vec![
            r#"{"think": "count", "code": "print(3)"}"#,
        ]));
        ObjectGenerator::new(ToolModels::single(client), TokenTracker::new(10_000))
    }

    #[tokio::test]
    async fn test_solve_retries_after_runtime_error() {
        let runner = Arc::new(FakeRunner {
            outputs: Mutex::new(vec![
                Err(AgentError::Sandbox("NameError".into())),
                Ok("3".into()),
            ]),
        });
        let sandbox = CodeSandbox::new(generator(), runner, 3);
        let sol = sandbox
            .solve(&TaskContext::new("t"), "count letters in 'abc'", "")
            .await
            .unwrap();
        assert_eq!(sol.output, "3");
        assert_eq!(sol.code, "print(3)");
    }

    #[tokio::test]
    async fn test_solve_gives_up_after_max_attempts() {
        let runner = Arc::new(FakeRunner {
            outputs: Mutex::new(vec![
                Err(AgentError::Sandbox("e1".into())),
                Err(AgentError::Sandbox("e2".into())),
            ]),
        });
        let sandbox = CodeSandbox::new(generator(), runner, 2);
        let err = sandbox
            .solve(&TaskContext::new("t"), "p", "")
            .await
            .unwrap_err();
        assert_eq!(err, AgentError::Sandbox("e2".into()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_with_shell() {
        let runner = ProcessRunner::new("sh", 5);
        assert_eq!(runner.run("echo 42").await.unwrap(), "42");
        assert!(runner.run("exit 3").await.is_err());
    }
}
