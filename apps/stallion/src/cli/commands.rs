//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use stallion_core::{
    BucketConfig, DataAccessRegistry, DataError, FieldValue, FilterOperation, FilterOperator,
    MappedModel, Model, ModelController, ModelId, Settings, SortDirection, StashKind,
    model::{FIELD_DELETED, FIELD_ID, FIELD_LAST_MODIFIED},
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Maximum configuration file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Read and validate a TOML configuration file.
pub fn load_settings(path: &Path) -> Result<Settings, DataError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        DataError::Config(format!(
            "Cannot read configuration '{}': {} (run `stallion init` first)",
            path.display(),
            e
        ))
    })?;
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(DataError::Config(format!(
            "Configuration size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_CONFIG_FILE_SIZE
        )));
    }

    let text = std::fs::read_to_string(path)
        .map_err(|e| DataError::Io(format!("Read config: {}", e)))?;
    let mut settings: Settings = toml::from_str(&text)
        .map_err(|e| DataError::Config(format!("Invalid configuration: {}", e)))?;
    settings.validate()?;

    // A relative data directory is resolved next to the configuration file.
    if settings.data_dir.is_relative()
        && let Some(parent) = path.parent()
    {
        settings.data_dir = parent.join(&settings.data_dir);
    }
    Ok(settings)
}

/// The configuration written by `stallion init`.
#[must_use]
pub fn default_settings() -> Settings {
    Settings {
        buckets: vec![BucketConfig {
            keys: vec!["author".to_string()],
            unique_keys: vec!["slug".to_string()],
            ..BucketConfig::named("articles")
        }],
        ..Settings::default()
    }
}

/// Build a registry and register every configured bucket.
pub fn open_registry(config: &Path) -> Result<DataAccessRegistry, DataError> {
    let settings = load_settings(config)?;
    let registry = DataAccessRegistry::new(settings)?;
    let count = registry.load_and_hydrate()?;
    tracing::debug!(buckets = count, "registry ready");
    Ok(registry)
}

fn controller(
    registry: &DataAccessRegistry,
    bucket: &str,
) -> Result<Arc<dyn ModelController<MappedModel>>, DataError> {
    registry.controller::<MappedModel>(bucket)
}

// =============================================================================
// JSON CONVERSION
// =============================================================================

/// Convert a JSON scalar into a field value. Floats, arrays and objects are rejected.
pub fn json_to_value(value: &serde_json::Value) -> Result<FieldValue, DataError> {
    match value {
        serde_json::Value::Null => Ok(FieldValue::Null),
        serde_json::Value::Bool(b) => Ok(FieldValue::Bool(*b)),
        serde_json::Value::String(s) => Ok(FieldValue::Text(s.clone())),
        serde_json::Value::Number(n) => n.as_i64().map(FieldValue::Int).ok_or_else(|| {
            DataError::Usage(format!("Only integer numbers are supported, got {}", n))
        }),
        other => Err(DataError::Usage(format!(
            "Only scalar values are supported, got {}",
            other
        ))),
    }
}

#[must_use]
pub fn value_to_json(value: &FieldValue) -> serde_json::Value {
    match value {
        FieldValue::Null => serde_json::Value::Null,
        FieldValue::Bool(b) => serde_json::Value::Bool(*b),
        FieldValue::Int(i) => serde_json::Value::from(*i),
        FieldValue::Text(s) => serde_json::Value::String(s.clone()),
    }
}

/// Flatten an entity into one JSON object, metadata first.
#[must_use]
pub fn model_to_json(item: &MappedModel) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    object.insert(FIELD_ID.to_string(), value_to_json(&item.value_of(FIELD_ID)));
    object.insert(FIELD_DELETED.to_string(), item.is_deleted().into());
    object.insert(
        FIELD_LAST_MODIFIED.to_string(),
        item.last_modified_millis().into(),
    );
    for (name, value) in &item.values {
        object.insert(name.clone(), value_to_json(value));
    }
    serde_json::Value::Object(object)
}

/// Split a JSON object into an optional id and the data fields.
pub fn parse_object(
    json: &str,
) -> Result<(Option<ModelId>, BTreeMap<String, FieldValue>), DataError> {
    let parsed: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| DataError::Serialization(format!("Invalid JSON: {}", e)))?;
    let serde_json::Value::Object(object) = parsed else {
        return Err(DataError::Usage("Expected a JSON object".to_string()));
    };

    let mut id = None;
    let mut values = BTreeMap::new();
    for (name, value) in &object {
        match name.as_str() {
            FIELD_ID => {
                id = match value {
                    serde_json::Value::Null => None,
                    other => Some(ModelId(other.as_u64().ok_or_else(|| {
                        DataError::Usage(format!("Invalid id: {}", other))
                    })?)),
                }
            }
            // Metadata is owned by the data layer.
            FIELD_DELETED | FIELD_LAST_MODIFIED => {}
            _ => {
                values.insert(name.clone(), json_to_value(value)?);
            }
        }
    }
    Ok((id, values))
}

// =============================================================================
// FILTER PARSING
// =============================================================================

/// Symbolic operators, longest first so `>=` wins over `>`.
const SYMBOLS: [&str; 7] = ["!=", ">=", "<=", "=", "<", ">", "~"];

/// Parse `field<op>value` (`=`, `!=`, `<`, `<=`, `>`, `>=`, `~`) or
/// `field:op:value` where `op` is any operator name (`in` takes a comma list).
pub fn parse_filter(expression: &str) -> Result<FilterOperation, DataError> {
    let invalid = || DataError::Usage(format!("Invalid filter expression: {}", expression));

    let symbolic = expression
        .char_indices()
        .find_map(|(at, _)| {
            SYMBOLS
                .iter()
                .find(|symbol| expression[at..].starts_with(*symbol))
                .map(|symbol| (at, *symbol))
        });

    let (field, operator, raw) = match symbolic {
        Some((at, symbol)) if !expression[..at].contains(':') => {
            let operator: FilterOperator = symbol.parse()?;
            (&expression[..at], operator, &expression[at + symbol.len()..])
        }
        _ => {
            let mut parts = expression.splitn(3, ':');
            let field = parts.next().ok_or_else(invalid)?;
            let operator: FilterOperator = parts.next().ok_or_else(invalid)?.parse()?;
            let raw = parts.next().ok_or_else(invalid)?;
            (field, operator, raw)
        }
    };

    let field = field.trim();
    if field.is_empty() {
        return Err(invalid());
    }
    let operation = match operator {
        FilterOperator::In => FilterOperation::one_of(
            field,
            raw.split(',')
                .map(|v| FieldValue::from(v.trim()))
                .collect(),
        ),
        _ => FilterOperation::new(field, operator, parse_raw_value(raw)),
    };
    Ok(operation)
}

/// `null` is the only literal; everything else stays text and is coerced by the filter.
fn parse_raw_value(raw: &str) -> FieldValue {
    match raw.trim() {
        "null" => FieldValue::Null,
        other => FieldValue::from(other),
    }
}

/// Parse `field` or `field:asc|desc`.
pub fn parse_sort(expression: &str) -> Result<(String, SortDirection), DataError> {
    let (field, direction) = match expression.split_once(':') {
        Some((field, direction)) => (field, direction.parse()?),
        None => (expression, SortDirection::Asc),
    };
    let field = field.trim();
    if field.is_empty() {
        return Err(DataError::Usage(format!(
            "Invalid sort expression: {}",
            expression
        )));
    }
    Ok((field.to_string(), direction))
}

// =============================================================================
// OUTPUT
// =============================================================================

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

fn print_entity(item: &MappedModel, json_mode: bool) {
    if json_mode {
        print_json(&model_to_json(item));
        return;
    }
    match item.id() {
        Some(id) => println!("#{} ({})", id, item.bucket()),
        None => println!("# ({})", item.bucket()),
    }
    if item.is_deleted() {
        println!("  [deleted]");
    }
    for (name, value) in &item.values {
        println!("  {:<16} {}", name, value);
    }
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Write a default configuration file.
pub fn cmd_init(config: &Path, force: bool) -> Result<(), DataError> {
    if config.exists() && !force {
        return Err(DataError::Config(
            "Configuration already exists. Use --force to overwrite.".to_string(),
        ));
    }
    let text = toml::to_string_pretty(&default_settings())
        .map_err(|e| DataError::Serialization(e.to_string()))?;
    std::fs::write(config, text).map_err(|e| DataError::Io(format!("Write config: {}", e)))?;
    println!("Initialized new configuration at {:?}", config);
    Ok(())
}

// =============================================================================
// BUCKETS COMMAND
// =============================================================================

/// List configured buckets without opening them.
pub fn cmd_buckets(config: &Path, json_mode: bool) -> Result<(), DataError> {
    let settings = load_settings(config)?;

    if json_mode {
        let buckets = serde_json::to_value(&settings.buckets)
            .map_err(|e| DataError::Serialization(e.to_string()))?;
        print_json(&buckets);
        return Ok(());
    }

    println!("Configured Buckets");
    println!("==================");
    for bucket in &settings.buckets {
        println!(
            "{:<20} stash={:<8} persister={:<7} keys={:?} unique={:?}",
            bucket.name,
            bucket.stash,
            bucket.persister,
            bucket.keys,
            bucket
                .unique_keys
                .iter()
                .chain(&bucket.case_insensitive_keys)
                .collect::<Vec<_>>()
        );
    }
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show per-bucket status.
pub fn cmd_status(config: &Path, json_mode: bool) -> Result<(), DataError> {
    let registry = open_registry(config)?;
    let status = registry.status();

    if json_mode {
        let output = serde_json::json!({
            "config": config.to_string_lossy(),
            "data_dir": registry.settings().data_dir.to_string_lossy(),
            "buckets": status,
        });
        print_json(&output);
        return Ok(());
    }

    println!("Stallion Status");
    println!("===============");
    println!("Config:   {:?}", config);
    println!("Data dir: {:?}", registry.settings().data_dir);
    println!();
    for bucket in &status {
        let memory = match bucket.stash {
            StashKind::NoStash => "-".to_string(),
            _ => bucket.in_memory.to_string(),
        };
        println!(
            "{:<20} stash={:<8} in_memory={:<8} writable={} db={}",
            bucket.bucket, bucket.stash, memory, bucket.writable, bucket.db_backed
        );
    }
    Ok(())
}

// =============================================================================
// READ COMMANDS
// =============================================================================

/// Read an entity by id.
pub fn cmd_get(
    config: &Path,
    json_mode: bool,
    bucket: &str,
    id: u64,
    with_deleted: bool,
) -> Result<(), DataError> {
    let registry = open_registry(config)?;
    let controller = controller(&registry, bucket)?;
    let item = if with_deleted {
        controller
            .for_id_with_deleted(ModelId(id))?
            .ok_or_else(|| DataError::NotFound {
                bucket: bucket.to_string(),
            })?
    } else {
        controller.for_id_or_not_found(ModelId(id))?
    };
    print_entity(&item, json_mode);
    Ok(())
}

/// Read an entity by unique key.
pub fn cmd_find(
    config: &Path,
    json_mode: bool,
    bucket: &str,
    key: &str,
    value: &str,
) -> Result<(), DataError> {
    let registry = open_registry(config)?;
    let controller = controller(&registry, bucket)?;
    let item = controller.for_unique_key_or_not_found(key, &parse_raw_value(value))?;
    print_entity(&item, json_mode);
    Ok(())
}

/// Arguments of `stallion list`.
#[derive(Debug, Clone, Default)]
pub struct ListArgs {
    pub bucket: String,
    pub filters: Vec<String>,
    pub search: Option<String>,
    pub search_in: Vec<String>,
    pub sorts: Vec<String>,
    pub page: usize,
    pub per_page: usize,
    pub with_deleted: bool,
}

/// Filter, sort and page a bucket.
pub fn cmd_list(config: &Path, json_mode: bool, args: &ListArgs) -> Result<(), DataError> {
    let registry = open_registry(config)?;
    let controller = controller(&registry, &args.bucket)?;

    let mut chain = controller.filter_chain()?;
    for expression in &args.filters {
        chain = chain.apply(parse_filter(expression)?);
    }
    if let Some(text) = &args.search {
        let fields: Vec<&str> = args.search_in.iter().map(String::as_str).collect();
        chain = chain.search(text, &fields);
    }
    for expression in &args.sorts {
        let (field, direction) = parse_sort(expression)?;
        chain = chain.sort(&field, direction);
    }
    if args.with_deleted {
        chain = chain.include_deleted();
    }

    let pager = chain.pager(args.page, args.per_page);

    if json_mode {
        let output = serde_json::json!({
            "bucket": args.bucket,
            "current_page": pager.current_page,
            "page_count": pager.page_count,
            "items_per_page": pager.items_per_page,
            "total_items": pager.total_items,
            "items": pager.items.iter().map(model_to_json).collect::<Vec<_>>(),
        });
        print_json(&output);
        return Ok(());
    }

    for item in &pager.items {
        print_entity(item, false);
    }
    println!();
    println!(
        "Page {} of {} ({} items)",
        pager.current_page,
        pager.page_count.max(1),
        pager.total_items
    );
    if let Some(next) = pager.next_page_number() {
        println!("Next page: --page {}", next);
    }
    Ok(())
}

// =============================================================================
// WRITE COMMANDS
// =============================================================================

/// Create or update an entity from a JSON object.
pub fn cmd_put(config: &Path, json_mode: bool, bucket: &str, json: &str) -> Result<(), DataError> {
    let (id, values) = parse_object(json)?;
    let registry = open_registry(config)?;
    let controller = controller(&registry, bucket)?;

    let existing = match id {
        Some(id) => controller.for_id_with_deleted(id)?,
        None => None,
    };
    let item = match existing {
        Some(mut item) => {
            controller.update_values(&mut item, &values)?;
            item
        }
        None => {
            let mut item = MappedModel::new();
            item.set_bucket(bucket);
            if let Some(id) = id {
                item.set_id(id);
            }
            for (name, value) in &values {
                item.set_field(name, value.clone())?;
            }
            controller.save(&mut item)?;
            item
        }
    };

    tracing::info!(bucket, id = ?item.id(), "entity saved");
    print_entity(&item, json_mode);
    Ok(())
}

/// Soft-delete or hard-delete an entity.
pub fn cmd_delete(
    config: &Path,
    json_mode: bool,
    bucket: &str,
    id: u64,
    hard: bool,
) -> Result<(), DataError> {
    let registry = open_registry(config)?;
    let controller = controller(&registry, bucket)?;
    let mut item = controller
        .for_id_with_deleted(ModelId(id))?
        .ok_or_else(|| DataError::NotFound {
            bucket: bucket.to_string(),
        })?;

    if hard {
        controller.hard_delete(&item)?;
    } else {
        controller.soft_delete(&mut item)?;
    }

    if json_mode {
        print_json(&serde_json::json!({ "bucket": bucket, "id": id, "hard": hard }));
    } else {
        let mode = if hard { "Hard-deleted" } else { "Deleted" };
        println!("{} #{} from {}", mode, id, bucket);
    }
    Ok(())
}

// =============================================================================
// RESET COMMAND
// =============================================================================

/// Reload one bucket, or every bucket, from storage.
pub fn cmd_reset(config: &Path, json_mode: bool, bucket: Option<&str>) -> Result<(), DataError> {
    let registry = open_registry(config)?;
    match bucket {
        Some(bucket) => controller(&registry, bucket)?.reset()?,
        None => registry.reset_all()?,
    }

    if json_mode {
        let reset = bucket.map_or_else(|| registry.buckets(), |b| vec![b.to_string()]);
        print_json(&serde_json::json!({ "reset": reset }));
    } else {
        println!("Reset {}", bucket.unwrap_or("all buckets"));
    }
    Ok(())
}
