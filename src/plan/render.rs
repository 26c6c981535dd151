//! 计划的确定性视图
//!
//! 同一计划与版本总是渲染出相同文本（markdown 勾选列表 + 进度行），用于 prompt 注入与外层展示。

use crate::plan::{Plan, TaskStatus};

fn marker(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "[ ]",
        TaskStatus::InProgress => "[~]",
        TaskStatus::Completed => "[x]",
        TaskStatus::Failed => "[!]",
        TaskStatus::Skipped => "[-]",
        TaskStatus::Blocked => "[#]",
        TaskStatus::Retry => "[r]",
    }
}

/// 渲染计划视图
pub fn render_plan(plan: &Plan, version: u64) -> String {
    let mut out = format!("# Plan (v{version})\n");
    for task in plan.tasks() {
        out.push_str(&format!("- {} {} {}", marker(task.status), task.id, task.title));
        if let Some(tool) = &task.tool {
            out.push_str(&format!(" (tool: {tool})"));
        }
        if !task.depends_on.is_empty() {
            let deps: Vec<&str> = task.depends_on.iter().map(String::as_str).collect();
            out.push_str(&format!(" <- {}", deps.join(", ")));
        }
        if let Some(owner) = &task.owner_agent {
            out.push_str(&format!(" @{owner}"));
        }
        out.push('\n');
    }
    out.push_str(&format!(
        "Progress: {}/{} completed, {} failed\n",
        plan.completed_count(),
        plan.total(),
        plan.failed_count()
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Task;

    #[test]
    fn test_render_is_deterministic() {
        let plan = Plan::from_tasks(vec![
            Task::new("t1", "Validate input")
                .with_tool("validate")
                .with_status(TaskStatus::Completed),
            Task::new("t2", "Create resource")
                .with_tool("create")
                .with_depends_on(["t1"])
                .with_owner("builder"),
        ]);
        let view = render_plan(&plan, 3);
        assert_eq!(view, render_plan(&plan.clone(), 3));
        assert_eq!(
            view,
            "# Plan (v3)\n\
             - [x] t1 Validate input (tool: validate)\n\
             - [ ] t2 Create resource (tool: create) <- t1 @builder\n\
             Progress: 1/2 completed, 0 failed\n"
        );
    }
}
