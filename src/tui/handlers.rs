//! Event handlers for the roster screens
//!
//! Handlers run on the UI thread (the terminal loop dispatches them). Disk
//! work goes through the task registry and reports back with
//! `run_on_ui_thread`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use uuid::Uuid;

use super::{RosterContext, RosterController, RosterView, Screen, StatusLevel};
use crate::lifecycle::Payload;
use crate::records::{PersonDraft, store};

const STATUS_TTL: Duration = Duration::from_secs(4);

pub fn register(controller: &mut RosterController) {
    controller
        .on("show_list", show_list)
        .on("show_detail", show_detail)
        .on("show_add", show_add)
        .on("show_edit", show_edit)
        .on("save_record", save_record)
        .on("delete_record", delete_record)
        .on("filter", filter)
        .on("reload", reload)
        .on("export", export)
        .on("clear_cache", clear_cache)
        .on("quit", quit);
}

fn record_id(payload: &Payload) -> Result<Uuid> {
    let raw = payload
        .get("id")
        .and_then(|id| id.as_str())
        .ok_or_else(|| anyhow!("Payload has no 'id' field"))?;
    Uuid::parse_str(raw).with_context(|| format!("Invalid record id '{}'", raw))
}

/// `kind` plus a fresh suffix; one per launch
fn task_id(kind: &str) -> String {
    format!("{}-{}", kind, Uuid::new_v4().simple())
}

/// Post a status message from any thread; it clears itself after a few seconds
fn notify(ctx: &RosterContext, level: StatusLevel, message: impl Into<String>) {
    let message = message.into();
    let stage = Arc::clone(ctx.screens.factory().stage());
    let tasks = Arc::clone(&ctx.tasks);

    ctx.ui.run_on_ui_thread(Box::new(move || {
        let generation = stage.set_status(level, message);
        tasks.launch_async(format!("status-{}", generation), move |token| async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(STATUS_TTL) => stage.clear_status(generation),
            }
            anyhow::Ok(())
        });
    }));
}

/// Refresh the cached list view, if there is one, against the roster
fn refresh_list(ctx: &RosterContext) {
    if let Some(view) = ctx.screens.cached_view(Screen::List) {
        if let Some(list) = view.as_list() {
            let roster = ctx.screens.factory().roster();
            list.set_people(roster.filter(&list.query()));
        }
    }
}

fn show_list(ctx: &RosterContext, _payload: Payload) -> Result<()> {
    let roster = Arc::clone(ctx.screens.factory().roster());
    ctx.screens.request_transition(
        Screen::List,
        Some(Box::new(move |view: &Arc<RosterView>| {
            let list = view.as_list().context("List screen holds the wrong view")?;
            list.set_people(roster.filter(&list.query()));
            Ok(())
        })),
    );
    Ok(())
}

fn show_detail(ctx: &RosterContext, payload: Payload) -> Result<()> {
    let id = record_id(&payload)?;
    let person = ctx
        .screens
        .factory()
        .roster()
        .get(id)
        .with_context(|| format!("No record with id {}", id))?;

    ctx.screens.request_transition(
        Screen::Detail,
        Some(Box::new(move |view: &Arc<RosterView>| {
            view.as_detail()
                .context("Detail screen holds the wrong view")?
                .load(person);
            Ok(())
        })),
    );
    Ok(())
}

fn show_add(ctx: &RosterContext, _payload: Payload) -> Result<()> {
    ctx.screens.request_transition(
        Screen::Add,
        Some(Box::new(|view: &Arc<RosterView>| {
            view.as_form().context("Add screen holds the wrong view")?.reset();
            Ok(())
        })),
    );
    Ok(())
}

fn show_edit(ctx: &RosterContext, payload: Payload) -> Result<()> {
    let id = record_id(&payload)?;
    let person = ctx
        .screens
        .factory()
        .roster()
        .get(id)
        .with_context(|| format!("No record with id {}", id))?;

    ctx.screens.request_transition(
        Screen::Edit,
        Some(Box::new(move |view: &Arc<RosterView>| {
            view.as_form()
                .context("Edit screen holds the wrong view")?
                .load(PersonDraft::from_person(&person));
            Ok(())
        })),
    );
    Ok(())
}

/// Validate the form, then write the roster in the background
fn save_record(ctx: &RosterContext, payload: Payload) -> Result<()> {
    let draft = PersonDraft::from_payload(&payload)?;
    let editing = draft.id.is_some();

    let person = match draft.into_person() {
        Ok(person) => person,
        Err(err) => {
            let message = format!("{:#}", err);
            let form_kind = if editing { Screen::Edit } else { Screen::Add };
            if let Some(form) = ctx.screens.cached_view(form_kind) {
                if let Some(form) = form.as_form() {
                    form.set_error(Some(message));
                }
            }
            return Err(err.context("Record failed validation"));
        }
    };

    let ctx = ctx.clone();
    let tasks = Arc::clone(&ctx.tasks);
    tasks.launch(task_id("save_record"), move |token| {
        let roster = Arc::clone(ctx.screens.factory().roster());
        let replaced = roster.upsert(person.clone());
        if token.is_cancelled() {
            // Left dirty; closing the roster at shutdown writes it
            return Ok(());
        }

        if let Err(err) = roster.persist() {
            notify(&ctx, StatusLevel::Error, format!("Save failed: {:#}", err));
            return Err(err);
        }

        let verb = if replaced { "Updated" } else { "Added" };
        notify(&ctx, StatusLevel::Info, format!("{} {}", verb, person.full_name()));

        let ui_ctx = ctx.clone();
        ctx.ui.run_on_ui_thread(Box::new(move || {
            refresh_list(&ui_ctx);
            ui_ctx.screens.request_transition(
                Screen::Detail,
                Some(Box::new(move |view: &Arc<RosterView>| {
                    view.as_detail()
                        .context("Detail screen holds the wrong view")?
                        .load(person);
                    Ok(())
                })),
            );
        }));
        Ok(())
    });
    Ok(())
}

fn delete_record(ctx: &RosterContext, payload: Payload) -> Result<()> {
    let id = record_id(&payload)?;
    let roster = Arc::clone(ctx.screens.factory().roster());
    let removed = roster
        .remove(id)
        .with_context(|| format!("No record with id {}", id))?;

    refresh_list(ctx);
    if ctx.screens.current_kind() != Some(Screen::List) {
        show_list(ctx, Payload::Null)?;
    }

    let ctx = ctx.clone();
    let tasks = Arc::clone(&ctx.tasks);
    tasks.launch(task_id("persist"), move |_token| {
        if let Err(err) = roster.persist() {
            notify(&ctx, StatusLevel::Error, format!("Delete not saved: {:#}", err));
            return Err(err);
        }
        notify(&ctx, StatusLevel::Info, format!("Deleted {}", removed.full_name()));
        Ok(())
    });
    Ok(())
}

fn filter(ctx: &RosterContext, payload: Payload) -> Result<()> {
    let query = payload.get("query").and_then(|q| q.as_str()).unwrap_or_default();
    let view = ctx
        .screens
        .cached_view(Screen::List)
        .context("List screen is not loaded")?;
    let list = view.as_list().context("List screen holds the wrong view")?;

    list.set_query(query);
    list.set_people(ctx.screens.factory().roster().filter(query));
    Ok(())
}

fn reload(ctx: &RosterContext, _payload: Payload) -> Result<()> {
    let ctx = ctx.clone();
    let tasks = Arc::clone(&ctx.tasks);
    tasks.launch(task_id("reload"), move |token| {
        let roster = ctx.screens.factory().roster();
        let count = match roster.reload() {
            Ok(count) => count,
            Err(err) => {
                notify(&ctx, StatusLevel::Error, format!("Reload failed: {:#}", err));
                return Err(err);
            }
        };
        if token.is_cancelled() {
            return Ok(());
        }

        notify(&ctx, StatusLevel::Info, format!("Reloaded {} record(s)", count));
        let ui_ctx = ctx.clone();
        ctx.ui.run_on_ui_thread(Box::new(move || refresh_list(&ui_ctx)));
        Ok(())
    });
    Ok(())
}

fn export(ctx: &RosterContext, payload: Payload) -> Result<()> {
    let path = payload
        .get("path")
        .and_then(|p| p.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("roster-export-{}.csv", Local::now().format("%Y%m%d-%H%M%S"))));
    let people = ctx.screens.factory().roster().all();

    let ctx = ctx.clone();
    let tasks = Arc::clone(&ctx.tasks);
    tasks.launch(task_id("export"), move |token| {
        match store::export(&people, &path, &token) {
            Ok(written) => {
                notify(&ctx, StatusLevel::Info, format!("Exported {} record(s) to {}", written, path.display()));
                Ok(())
            }
            Err(err) => {
                notify(&ctx, StatusLevel::Error, format!("Export failed: {:#}", err));
                Err(err)
            }
        }
    });
    Ok(())
}

fn clear_cache(ctx: &RosterContext, _payload: Payload) -> Result<()> {
    let evicted = ctx.screens.clear_cache();
    notify(ctx, StatusLevel::Info, format!("Dropped {} cached view(s)", evicted));
    Ok(())
}

fn quit(ctx: &RosterContext, _payload: Payload) -> Result<()> {
    ctx.shutdown.initiate(Some("user quit"));
    Ok(())
}
