use crate::application::commands::{
    AppState, TaskView, change_password_impl, create_task_impl, current_user_impl,
    delete_journals_impl, delete_tasks_impl, generate_journal_impl, get_settings_impl,
    list_journals_impl, list_tasks_impl, list_templates_impl, login_impl, logout_impl,
    navigate_impl, reset_password_impl, save_template_impl, set_api_key_impl,
    set_daily_template_impl, signup_impl, transfer_pending_tasks_impl, update_task_impl,
    update_username_impl,
};
use crate::domain::models::DayOfWeek;
use crate::infrastructure::error::InfraError;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(name = "daily-planner")]
#[command(about = "Weekday task lanes, generated daily journals and per-user settings")]
#[command(version)]
pub struct Cli {
    /// Workspace holding config/, state/ and logs/ (defaults to the current directory)
    #[arg(long, global = true)]
    pub root: Option<String>,

    /// Print single-line JSON
    #[arg(long, global = true)]
    pub compact: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Lane {
    All,
    Today,
    Next,
    Someday,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Sign in with email and password
    Login {
        email: String,
        password: String,
        /// Keep the session only for this process
        #[arg(long)]
        no_remember: bool,
    },
    /// Create an account and sign in
    Signup {
        email: String,
        password: String,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        no_remember: bool,
    },
    Logout,
    /// Send a password reset email
    ResetPassword { email: String },
    ChangePassword { new_password: String },
    UpdateUsername { username: String },
    /// Show the signed-in user
    Whoami,
    /// Add a task (today lane on the current weekday unless told otherwise)
    AddTask {
        text: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        status: Option<String>,
        /// Weekday, 0 = Sunday
        #[arg(long)]
        day: Option<u8>,
    },
    ListTasks {
        #[arg(long, value_enum, default_value = "all")]
        lane: Lane,
        /// Today-lane tasks planned for this weekday (0 = Sunday)
        #[arg(long, conflicts_with = "lane")]
        day: Option<u8>,
        /// With --day, only tasks created this week
        #[arg(long, requires = "day")]
        this_week: bool,
    },
    UpdateTask {
        id: String,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long, conflicts_with = "clear_day")]
        day: Option<u8>,
        #[arg(long)]
        clear_day: bool,
    },
    DeleteTasks {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Move unfinished tasks to the following weekday
    Rollover {
        #[arg(long)]
        from_day: Option<u8>,
    },
    /// Generate and store a journal entry
    Journal {
        /// YYYY-MM-DD, defaults to today
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        include_incomplete: bool,
        #[arg(long)]
        template: Option<String>,
    },
    ListJournals,
    DeleteJournals {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    SaveTemplate {
        template: String,
        #[arg(long = "default")]
        is_default: bool,
    },
    ListTemplates,
    Settings,
    SetApiKey { api_key: String },
    SetTemplate { template: String },
    /// Check where a route path would lead
    Navigate { path: String },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Signup { .. } => "signup",
            Self::Logout => "logout",
            Self::ResetPassword { .. } => "reset_password",
            Self::ChangePassword { .. } => "change_password",
            Self::UpdateUsername { .. } => "update_username",
            Self::Whoami => "current_user",
            Self::AddTask { .. } => "create_task",
            Self::ListTasks { .. } => "list_tasks",
            Self::UpdateTask { .. } => "update_task",
            Self::DeleteTasks { .. } => "delete_tasks",
            Self::Rollover { .. } => "transfer_pending_tasks",
            Self::Journal { .. } => "generate_journal",
            Self::ListJournals => "list_journals",
            Self::DeleteJournals { .. } => "delete_journals",
            Self::SaveTemplate { .. } => "save_template",
            Self::ListTemplates => "list_templates",
            Self::Settings => "get_settings",
            Self::SetApiKey { .. } => "set_api_key",
            Self::SetTemplate { .. } => "set_daily_template",
            Self::Navigate { .. } => "navigate",
        }
    }
}

fn task_view(lane: Lane, day: Option<u8>, this_week: bool) -> Result<TaskView, InfraError> {
    if let Some(index) = day {
        let day = DayOfWeek::new(index).map_err(InfraError::InvalidInput)?;
        return Ok(if this_week {
            TaskView::Week(day)
        } else {
            TaskView::Day(day)
        });
    }
    Ok(match lane {
        Lane::All => TaskView::All,
        Lane::Today => TaskView::Today,
        Lane::Next => TaskView::Next,
        Lane::Someday => TaskView::Someday,
    })
}

fn output<T: Serialize>(value: T) -> Result<Value, InfraError> {
    Ok(serde_json::to_value(value)?)
}

/// Runs one command against `state`; failures are logged and returned as text.
pub async fn dispatch(state: &AppState, command: Commands) -> Result<Value, String> {
    let name = command.name();
    execute(state, command)
        .await
        .map_err(|error| state.command_error(name, &error))
}

async fn execute(state: &AppState, command: Commands) -> Result<Value, InfraError> {
    match command {
        Commands::Login {
            email,
            password,
            no_remember,
        } => output(login_impl(state, email, password, !no_remember).await?),
        Commands::Signup {
            email,
            password,
            username,
            no_remember,
        } => output(signup_impl(state, email, password, !no_remember, username).await?),
        Commands::Logout => output(logout_impl(state)?),
        Commands::ResetPassword { email } => output(reset_password_impl(state, email).await?),
        Commands::ChangePassword { new_password } => {
            output(change_password_impl(state, new_password).await?)
        }
        Commands::UpdateUsername { username } => {
            output(update_username_impl(state, username).await?)
        }
        Commands::Whoami => output(current_user_impl(state)),
        Commands::AddTask {
            text,
            category,
            status,
            day,
        } => output(create_task_impl(state, text, category, status, day).await?),
        Commands::ListTasks {
            lane,
            day,
            this_week,
        } => output(list_tasks_impl(state, task_view(lane, day, this_week)?).await?),
        Commands::UpdateTask {
            id,
            text,
            status,
            category,
            day,
            clear_day,
        } => {
            let day = if clear_day { Some(None) } else { day.map(Some) };
            output(update_task_impl(state, id, text, status, category, day).await?)
        }
        Commands::DeleteTasks { ids } => output(delete_tasks_impl(state, ids).await?),
        Commands::Rollover { from_day } => {
            output(transfer_pending_tasks_impl(state, from_day).await?)
        }
        Commands::Journal {
            date,
            include_incomplete,
            template,
        } => output(generate_journal_impl(state, date, include_incomplete, template).await?),
        Commands::ListJournals => output(list_journals_impl(state).await?),
        Commands::DeleteJournals { ids } => output(delete_journals_impl(state, ids).await?),
        Commands::SaveTemplate {
            template,
            is_default,
        } => output(save_template_impl(state, template, is_default).await?),
        Commands::ListTemplates => output(list_templates_impl(state).await?),
        Commands::Settings => output(get_settings_impl(state).await?),
        Commands::SetApiKey { api_key } => output(set_api_key_impl(state, api_key).await?),
        Commands::SetTemplate { template } => {
            output(set_daily_template_impl(state, template).await?)
        }
        Commands::Navigate { path } => output(navigate_impl(state, path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_remembers_by_default() {
        let cli = Cli::try_parse_from(["daily-planner", "login", "ana@example.com", "secret"])
            .expect("parse");
        match cli.command {
            Commands::Login { no_remember, .. } => assert!(!no_remember),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn week_filter_needs_a_day() {
        assert!(Cli::try_parse_from(["daily-planner", "list-tasks", "--this-week"]).is_err());
        let cli = Cli::try_parse_from([
            "daily-planner",
            "--compact",
            "list-tasks",
            "--day",
            "2",
            "--this-week",
        ])
        .expect("parse");
        assert!(cli.compact);
        match cli.command {
            Commands::ListTasks {
                lane,
                day,
                this_week,
            } => {
                let view = task_view(lane, day, this_week).expect("view");
                assert_eq!(view, TaskView::Week(DayOfWeek::new(2).unwrap()));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn out_of_range_day_is_invalid_input() {
        assert!(matches!(
            task_view(Lane::All, Some(7), false),
            Err(InfraError::InvalidInput(_))
        ));
        assert_eq!(task_view(Lane::Next, None, false).unwrap(), TaskView::Next);
    }

    #[test]
    fn clear_day_conflicts_with_day() {
        assert!(
            Cli::try_parse_from(["daily-planner", "update-task", "t1", "--day", "1", "--clear-day"])
                .is_err()
        );
    }
}
