use serde::Serialize;

use hub_core::entities::{TableField, ThematicInterface};
use hub_core::enums::InterfaceType;
use hub_db::repos::interface::NewInterface;
use hub_engine::ReconcileOutcome;

use crate::cli::GlobalFlags;
use crate::cli::subcommands::InterfaceCommands;
use crate::commands::shared::input::read_json;
use crate::commands::shared::parse::parse_enum;
use crate::context::AppContext;
use crate::output::output;

#[derive(Debug, Serialize)]
struct FieldsResponse {
    interface: ThematicInterface,
    outcome: ReconcileOutcome,
}

#[derive(Debug, Serialize)]
struct ReconcileResponse {
    interface: ThematicInterface,
    changed: bool,
}

#[derive(Debug, Serialize)]
struct ViewResponse {
    interface_id: String,
    view_sql: Option<String>,
    action: &'static str,
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    interface_id: String,
    deleted: bool,
}

/// Handle `datahub interface`.
pub async fn handle(
    action: &InterfaceCommands,
    ctx: &AppContext,
    flags: &GlobalFlags,
) -> anyhow::Result<()> {
    match action {
        InterfaceCommands::Create {
            library,
            name,
            interface_type,
            display,
            description,
            fields,
            sql,
        } => {
            let interface_type = parse_enum::<InterfaceType>(interface_type, "type")?;
            let fields = fields
                .as_deref()
                .map(read_json::<Vec<TableField>>)
                .transpose()?
                .unwrap_or_default();
            if interface_type.is_view() != sql.is_some() {
                anyhow::bail!("views need --sql and tables must not have it");
            }

            let mut new = NewInterface::new(library, name, interface_type);
            new.name_zh = display.clone().unwrap_or_default();
            new.description.clone_from(description);
            let interface = ctx.service.create_interface(&new).await?;

            if let Some(sql) = sql {
                ctx.reconciler.create_view(&interface.id, sql).await?;
            } else if !fields.is_empty() {
                ctx.reconciler.apply_fields(&interface.id, fields).await?;
            }
            output(&ctx.service.get_interface(&interface.id).await?, flags.format)
        }
        InterfaceCommands::List { library } => {
            output(&ctx.service.list_interfaces(library.as_deref()).await?, flags.format)
        }
        InterfaceCommands::Get { id } => output(&ctx.service.get_interface(id).await?, flags.format),
        InterfaceCommands::Fields { id, file } => {
            let fields: Vec<TableField> = read_json(file)?;
            let outcome = ctx.reconciler.apply_fields(id, fields).await?;
            output(
                &FieldsResponse {
                    interface: ctx.service.get_interface(id).await?,
                    outcome,
                },
                flags.format,
            )
        }
        InterfaceCommands::Reconcile { id } => {
            let changed = ctx.reconciler.sync_fields_from_catalog(id).await?;
            output(
                &ReconcileResponse {
                    interface: ctx.service.get_interface(id).await?,
                    changed,
                },
                flags.format,
            )
        }
        InterfaceCommands::View { id, sql, drop } => {
            let action = if *drop {
                ctx.reconciler.drop_view(id).await?;
                "dropped"
            } else if let Some(sql) = sql {
                let interface = ctx.service.get_interface(id).await?;
                if interface.is_view_created {
                    ctx.reconciler.update_view(id, sql).await?;
                    "updated"
                } else {
                    ctx.reconciler.create_view(id, sql).await?;
                    "created"
                }
            } else {
                "shown"
            };
            output(
                &ViewResponse {
                    interface_id: id.clone(),
                    view_sql: ctx.reconciler.view_sql(id).await?.filter(|s| !s.is_empty()),
                    action,
                },
                flags.format,
            )
        }
        InterfaceCommands::Delete { id } => {
            ctx.reconciler.delete_interface(id).await?;
            output(
                &DeleteResponse {
                    interface_id: id.clone(),
                    deleted: true,
                },
                flags.format,
            )
        }
    }
}
