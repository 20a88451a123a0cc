//! mock 领域工具与断言函数

use schemars::JsonSchema;
use serde::Deserialize;

use crate::core::{HarnessError, ToolError};
use crate::domains::mock::db::{MockDb, MockTask, MockUser, TaskStatus};
use crate::environment::{ToolRegistry, ToolType};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateTaskArgs {
    /// The ID of the user creating the task
    pub user_id: String,
    /// The title of the task
    pub title: String,
    /// Optional description of the task
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GetUsersArgs {}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateTaskStatusArgs {
    /// The ID of the task to update
    pub task_id: String,
    /// The new status of the task
    pub status: TaskStatus,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TransferArgs {
    /// A summary of the user's issue
    pub summary: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RenameUserArgs {
    pub user_id: String,
    pub name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NumberOfTasksArgs {
    pub user_id: String,
    pub expected_number: usize,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TaskStatusArgs {
    pub task_id: String,
    pub expected_status: TaskStatus,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TasksWithTitleArgs {
    pub title: String,
    pub expected_number: usize,
}

/// 新任务 id 为 `task_{n+1}`，n 为当前任务数；初始状态 pending
pub fn create_task(db: &mut MockDb, args: CreateTaskArgs) -> Result<MockTask, ToolError> {
    let task_id = format!("task_{}", db.tasks.len() + 1);
    if db.tasks.contains_key(&task_id) {
        return Err(ToolError::failed(format!("Task {task_id} already exists")));
    }
    let user = db
        .users
        .get_mut(&args.user_id)
        .ok_or_else(|| ToolError::failed(format!("User {} not found", args.user_id)))?;
    let task = MockTask {
        task_id: task_id.clone(),
        title: args.title,
        description: args.description,
        status: TaskStatus::Pending,
    };
    user.tasks.push(task_id.clone());
    db.tasks.insert(task_id, task.clone());
    Ok(task)
}

pub fn get_users(db: &mut MockDb, _args: GetUsersArgs) -> Result<Vec<MockUser>, ToolError> {
    Ok(db.users.values().cloned().collect())
}

pub fn update_task_status(
    db: &mut MockDb,
    args: UpdateTaskStatusArgs,
) -> Result<MockTask, ToolError> {
    let task = db
        .tasks
        .get_mut(&args.task_id)
        .ok_or_else(|| ToolError::failed(format!("Task {} not found", args.task_id)))?;
    task.status = args.status;
    Ok(task.clone())
}

pub fn transfer_to_human_agents(_db: &mut MockDb, _args: TransferArgs) -> Result<String, ToolError> {
    Ok("Transfer successful".to_string())
}

/// 初始化辅助：修改用户姓名（Agent 不可见）
pub fn rename_user(db: &mut MockDb, args: RenameUserArgs) -> Result<MockUser, ToolError> {
    let user = db
        .users
        .get_mut(&args.user_id)
        .ok_or_else(|| ToolError::failed(format!("User {} not found", args.user_id)))?;
    user.name = args.name;
    Ok(user.clone())
}

pub fn assert_number_of_tasks(db: &mut MockDb, args: NumberOfTasksArgs) -> Result<bool, ToolError> {
    let user = db
        .users
        .get(&args.user_id)
        .ok_or_else(|| ToolError::failed(format!("User {} not found", args.user_id)))?;
    Ok(user.tasks.len() == args.expected_number)
}

pub fn assert_task_status(db: &mut MockDb, args: TaskStatusArgs) -> Result<bool, ToolError> {
    let task = db
        .tasks
        .get(&args.task_id)
        .ok_or_else(|| ToolError::failed(format!("Task {} not found", args.task_id)))?;
    Ok(task.status == args.expected_status)
}

pub fn assert_tasks_with_title(
    db: &mut MockDb,
    args: TasksWithTitleArgs,
) -> Result<bool, ToolError> {
    let count = db.tasks.values().filter(|t| t.title == args.title).count();
    Ok(count == args.expected_number)
}

pub fn build_registry() -> Result<ToolRegistry<MockDb>, HarnessError> {
    let mut registry = ToolRegistry::new();
    registry.register(
        "create_task",
        "Create a new task for a user.",
        ToolType::Write,
        create_task,
    )?;
    registry.register(
        "get_users",
        "Get all users in the database.",
        ToolType::Read,
        get_users,
    )?;
    registry.register(
        "update_task_status",
        "Update the status of a task.",
        ToolType::Write,
        update_task_status,
    )?;
    registry.register(
        "transfer_to_human_agents",
        "Transfer the user to a human agent, with a summary of the user's issue. \
         Only transfer if the user explicitly asks for a human agent or the request \
         cannot be handled with the available tools.",
        ToolType::Generic,
        transfer_to_human_agents,
    )?;
    registry.register_function(
        "rename_user",
        "Change the name registered for a user.",
        ToolType::Write,
        rename_user,
    )?;
    registry.register_function(
        "assert_number_of_tasks",
        "Check that a user owns exactly the expected number of tasks.",
        ToolType::Read,
        assert_number_of_tasks,
    )?;
    registry.register_function(
        "assert_task_status",
        "Check the status of a task.",
        ToolType::Read,
        assert_task_status,
    )?;
    registry.register_function(
        "assert_tasks_with_title",
        "Check how many tasks carry the given title.",
        ToolType::Read,
        assert_tasks_with_title,
    )?;
    Ok(registry)
}
