use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use serde::Serialize;
use serde_json::{json, Value};
use stow_core::{
    Container, OpenMode, PropertySet, StorageAccess, StructuredStorage, SummaryField,
};

use crate::cli::*;

pub fn run_command(cli: Cli, out: &mut dyn Write) -> anyhow::Result<()> {
    let json = matches!(cli.format, OutputFormat::Json);
    match cli.command {
        Command::Init(args) => cmd_init(args, json, out),
        Command::Ls(args) => cmd_ls(args, json, out),
        Command::Tree(args) => cmd_tree(args, json, out),
        Command::Mkdir(args) => cmd_mkdir(args, json, out),
        Command::Put(args) => cmd_put(args, json, out),
        Command::Cat(args) => cmd_cat(args, out),
        Command::Rm(args) => cmd_rm(args, json, out),
        Command::Mv(args) => cmd_mv(args, json, out),
        Command::Prop(args) => cmd_prop(args.action, json, out),
        Command::Summary(args) => cmd_summary(args, json, out),
    }
}

fn open_read(file: &Path) -> anyhow::Result<StructuredStorage> {
    StructuredStorage::open(Some(file), OpenMode::Open, StorageAccess::ReadOnlyShared)
        .with_context(|| format!("cannot open {}", file.display()))
}

fn open_write(file: &Path) -> anyhow::Result<StructuredStorage> {
    StructuredStorage::open(Some(file), OpenMode::Open, StorageAccess::ReadWriteExclusive)
        .with_context(|| format!("cannot open {} for writing", file.display()))
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Split `path` into its container segments and the final element name.
fn split_leaf(path: &str) -> anyhow::Result<(Vec<&str>, &str)> {
    let mut segs = segments(path);
    let leaf = segs
        .pop()
        .with_context(|| format!("path {path:?} names no element"))?;
    Ok((segs, leaf))
}

/// Walk container names from the root, optionally creating missing ones.
fn walk(store: &StructuredStorage, segs: &[&str], create: bool) -> anyhow::Result<Container> {
    let mut container = store.root()?;
    for seg in segs {
        let children = container.containers();
        container = if create {
            children.get_or_add(seg)?
        } else {
            children
                .get(seg)
                .with_context(|| format!("no container named {seg:?}"))?
        };
    }
    Ok(container)
}

fn property_set_at(
    store: &StructuredStorage,
    path: &str,
    create: bool,
) -> anyhow::Result<PropertySet> {
    let (segs, leaf) = split_leaf(path)?;
    let sets = walk(store, &segs, false)?.property_sets();
    let set = if create {
        sets.get_or_add(leaf)?
    } else {
        sets.get(leaf)
            .with_context(|| format!("no property set named {leaf:?}"))?
    };
    Ok(set)
}

fn emit<T: Serialize>(out: &mut dyn Write, value: &T) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn done(out: &mut dyn Write, json: bool, action: &str, path: &str) -> anyhow::Result<()> {
    if json {
        emit(out, &json!({ "action": action, "path": path }))
    } else {
        writeln!(out, "{} {} {}", "✓".green().bold(), action, path.bold())?;
        Ok(())
    }
}

fn cmd_init(args: InitArgs, json: bool, out: &mut dyn Write) -> anyhow::Result<()> {
    let mode = if args.force { OpenMode::Create } else { OpenMode::CreateNew };
    let store = StructuredStorage::open(Some(&args.file), mode, StorageAccess::ReadWriteExclusive)
        .with_context(|| format!("cannot create {}", args.file.display()))?;
    store.close()?;
    done(out, json, "initialized", &args.file.display().to_string())
}

#[derive(Serialize)]
struct Listing {
    containers: Vec<String>,
    objects: Vec<ObjectEntry>,
    property_sets: Vec<SetEntry>,
}

#[derive(Serialize)]
struct ObjectEntry {
    name: String,
    size: u64,
}

#[derive(Serialize)]
struct SetEntry {
    name: String,
    properties: usize,
}

fn list(container: &Container) -> anyhow::Result<Listing> {
    let mut objects = Vec::new();
    for object in container.objects().iter()? {
        let object = object?;
        objects.push(ObjectEntry {
            name: object.name()?,
            size: object.len()?,
        });
    }
    let mut property_sets = Vec::new();
    for set in container.property_sets().iter()? {
        let set = set?;
        property_sets.push(SetEntry {
            name: set.name()?,
            properties: set.count()?,
        });
    }
    Ok(Listing {
        containers: container.containers().names()?,
        objects,
        property_sets,
    })
}

fn cmd_ls(args: LsArgs, json: bool, out: &mut dyn Write) -> anyhow::Result<()> {
    let store = open_read(&args.file)?;
    let path = args.path.unwrap_or_default();
    let listing = list(&walk(&store, &segments(&path), false)?)?;
    if json {
        return emit(out, &listing);
    }
    for name in &listing.containers {
        writeln!(out, "{}", format!("{name}/").blue().bold())?;
    }
    for object in &listing.objects {
        writeln!(out, "{:<32} {:>10}", object.name, object.size)?;
    }
    for set in &listing.property_sets {
        let count = format!("[{} properties]", set.properties);
        writeln!(out, "{:<32} {}", set.name.cyan(), count.dimmed())?;
    }
    Ok(())
}

#[derive(Serialize)]
struct TreeNode {
    name: String,
    objects: Vec<String>,
    property_sets: Vec<String>,
    containers: Vec<TreeNode>,
}

fn tree(container: &Container) -> anyhow::Result<TreeNode> {
    let mut containers = Vec::new();
    for child in container.containers().iter()? {
        containers.push(tree(&child?)?);
    }
    Ok(TreeNode {
        name: container.name()?,
        objects: container.objects().names()?,
        property_sets: container.property_sets().names()?,
        containers,
    })
}

fn print_tree(out: &mut dyn Write, node: &TreeNode, depth: usize) -> anyhow::Result<()> {
    let indent = "  ".repeat(depth);
    writeln!(out, "{indent}{}", format!("{}/", node.name).blue().bold())?;
    for child in &node.containers {
        print_tree(out, child, depth + 1)?;
    }
    for name in &node.objects {
        writeln!(out, "{indent}  {name}")?;
    }
    for name in &node.property_sets {
        writeln!(out, "{indent}  {}", name.cyan())?;
    }
    Ok(())
}

fn cmd_tree(args: FileArgs, json: bool, out: &mut dyn Write) -> anyhow::Result<()> {
    let store = open_read(&args.file)?;
    let node = tree(&store.root()?)?;
    if json {
        emit(out, &node)
    } else {
        print_tree(out, &node, 0)
    }
}

fn cmd_mkdir(args: MkdirArgs, json: bool, out: &mut dyn Write) -> anyhow::Result<()> {
    let store = open_write(&args.file)?;
    if args.parents {
        walk(&store, &segments(&args.path), true)?;
    } else {
        let (segs, leaf) = split_leaf(&args.path)?;
        walk(&store, &segs, false)?.containers().add(leaf)?;
    }
    store.close()?;
    done(out, json, "created", &args.path)
}

fn cmd_put(args: PutArgs, json: bool, out: &mut dyn Write) -> anyhow::Result<()> {
    let data = fs::read(&args.source)
        .with_context(|| format!("cannot read {}", args.source.display()))?;
    let store = open_write(&args.file)?;
    let (segs, leaf) = split_leaf(&args.path)?;
    let object = walk(&store, &segs, false)?.objects().get_or_add(leaf)?;
    object.set_data(&data)?;
    store.close()?;
    if json {
        emit(out, &json!({ "action": "written", "path": args.path, "size": data.len() }))
    } else {
        writeln!(
            out,
            "{} wrote {} bytes to {}",
            "✓".green().bold(),
            data.len(),
            args.path.bold()
        )?;
        Ok(())
    }
}

fn cmd_cat(args: PathArgs, out: &mut dyn Write) -> anyhow::Result<()> {
    let store = open_read(&args.file)?;
    let (segs, leaf) = split_leaf(&args.path)?;
    let object = walk(&store, &segs, false)?
        .objects()
        .get(leaf)
        .with_context(|| format!("no object named {leaf:?}"))?;
    out.write_all(&object.data()?)?;
    Ok(())
}

fn cmd_rm(args: PathArgs, json: bool, out: &mut dyn Write) -> anyhow::Result<()> {
    let store = open_write(&args.file)?;
    let (segs, leaf) = split_leaf(&args.path)?;
    let parent = walk(&store, &segs, false)?;
    let removed = parent.containers().remove(leaf)?
        || parent.objects().remove(leaf)?
        || parent.property_sets().remove(leaf)?;
    if !removed {
        bail!("nothing named {leaf:?} under {}", args.path);
    }
    store.close()?;
    done(out, json, "removed", &args.path)
}

fn cmd_mv(args: MvArgs, json: bool, out: &mut dyn Write) -> anyhow::Result<()> {
    let store = open_write(&args.file)?;
    let (segs, leaf) = split_leaf(&args.path)?;
    let parent = walk(&store, &segs, false)?;
    if parent.containers().contains(leaf)? {
        parent.containers().get(leaf)?.set_name(&args.new_name)?;
    } else if parent.objects().contains(leaf)? {
        parent.objects().get(leaf)?.set_name(&args.new_name)?;
    } else if parent.property_sets().contains(leaf)? {
        parent.property_sets().get(leaf)?.set_name(&args.new_name)?;
    } else {
        bail!("nothing named {leaf:?} under {}", args.path);
    }
    store.close()?;
    done(out, json, "renamed", &format!("{} -> {}", args.path, args.new_name))
}

#[derive(Serialize)]
struct PropertyRow {
    name: String,
    kind: String,
    value: Value,
}

fn cmd_prop(action: PropAction, json: bool, out: &mut dyn Write) -> anyhow::Result<()> {
    match action {
        PropAction::Get { file, path, name } => {
            let store = open_read(&file)?;
            let value = property_set_at(&store, &path, false)?.get(&name)?;
            if json {
                emit(
                    out,
                    &PropertyRow {
                        name,
                        kind: value.kind().to_string(),
                        value: value.to_json(),
                    },
                )
            } else {
                writeln!(out, "{value}")?;
                Ok(())
            }
        }
        PropAction::Set {
            file,
            path,
            name,
            value,
            string,
        } => {
            let parsed = if string {
                Value::String(value.clone())
            } else {
                serde_json::from_str(&value).unwrap_or_else(|_| Value::String(value.clone()))
            };
            let store = open_write(&file)?;
            property_set_at(&store, &path, true)?.set_json(&name, parsed)?;
            store.close()?;
            done(out, json, "set", &format!("{path}:{name}"))
        }
        PropAction::Ls { file, path } => {
            let store = open_read(&file)?;
            let rows: Vec<PropertyRow> = property_set_at(&store, &path, false)?
                .iter()?
                .into_iter()
                .map(|(name, value)| PropertyRow {
                    name,
                    kind: value.kind().to_string(),
                    value: value.to_json(),
                })
                .collect();
            if json {
                return emit(out, &rows);
            }
            for row in &rows {
                writeln!(out, "{:<24} {:<10} {}", row.name.bold(), row.kind.dimmed(), row.value)?;
            }
            Ok(())
        }
        PropAction::Rm { file, path, name } => {
            let store = open_write(&file)?;
            if !property_set_at(&store, &path, false)?.remove(&name)? {
                bail!("no property named {name:?} in {path}");
            }
            store.close()?;
            done(out, json, "removed", &format!("{path}:{name}"))
        }
    }
}

fn cmd_summary(args: SummaryArgs, json: bool, out: &mut dyn Write) -> anyhow::Result<()> {
    let store = if args.set.is_empty() {
        open_read(&args.file)?
    } else {
        open_write(&args.file)?
    };
    let summary = store.summary_information()?;
    for assignment in &args.set {
        let (key, value) = assignment
            .split_once('=')
            .with_context(|| format!("expected FIELD=VALUE, got {assignment:?}"))?;
        let field: SummaryField = key.trim().parse()?;
        summary.set_field(field, value)?;
    }

    let snapshot = summary.snapshot();
    store.close()?;
    if json {
        return emit(out, &snapshot);
    }
    let fields = serde_json::to_value(&snapshot)?;
    for field in SummaryField::ALL {
        let value = match &fields[field.as_str()] {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        writeln!(out, "{:<24} {}", field.as_str().bold(), value)?;
    }
    Ok(())
}
