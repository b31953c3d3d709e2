//! Integration tests for the Stallion CLI.
//!
//! Commands run against a configuration in a temporary directory; results
//! are checked by opening the same buckets through the registry.

use clap::Parser;
use stallion::cli::{
    Cli, Commands, ListArgs, cmd_delete, cmd_get, cmd_init, cmd_list, cmd_put, cmd_reset,
    load_settings, open_registry,
};
use stallion_core::{DataError, FieldValue, MappedModel, Model, PersisterKind};
use std::path::{Path, PathBuf};
use tempfile::tempdir;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn init_config(dir: &Path) -> PathBuf {
    let config = dir.join("stallion.toml");
    cmd_init(&config, false).expect("init");
    config
}

fn article_by_slug(config: &Path, slug: &str) -> Option<MappedModel> {
    let registry = open_registry(config).expect("registry");
    let controller = registry
        .controller::<MappedModel>("articles")
        .expect("controller");
    controller
        .for_unique_key("slug", &FieldValue::from(slug))
        .expect("lookup")
}

fn list_args(filters: &[&str]) -> ListArgs {
    ListArgs {
        bucket: "articles".to_string(),
        filters: filters.iter().map(|f| f.to_string()).collect(),
        page: 1,
        per_page: 20,
        ..ListArgs::default()
    }
}

// =============================================================================
// ARGUMENT PARSING
// =============================================================================

#[test]
fn test_parse_list_arguments() {
    let cli = Cli::try_parse_from([
        "stallion",
        "--json-mode",
        "-c",
        "custom.toml",
        "list",
        "articles",
        "-f",
        "views>=10",
        "-f",
        "author=ada",
        "--search",
        "rust",
        "--search-in",
        "title,slug",
        "--sort",
        "views:desc",
        "--page",
        "2",
    ])
    .expect("parse");

    assert!(cli.json_mode);
    assert_eq!(cli.config, PathBuf::from("custom.toml"));
    let Some(Commands::List {
        bucket,
        filter,
        search,
        search_in,
        sort,
        page,
        per_page,
        with_deleted,
    }) = cli.command
    else {
        unreachable!("expected list command");
    };
    assert_eq!(bucket, "articles");
    assert_eq!(filter, vec!["views>=10", "author=ada"]);
    assert_eq!(search.as_deref(), Some("rust"));
    assert_eq!(search_in, vec!["title", "slug"]);
    assert_eq!(sort, vec!["views:desc"]);
    assert_eq!(page, 2);
    assert_eq!(per_page, 20);
    assert!(!with_deleted);
}

#[test]
fn test_parse_defaults_to_status() {
    let cli = Cli::try_parse_from(["stallion"]).expect("parse");
    assert!(cli.command.is_none());
    assert_eq!(cli.config, PathBuf::from("stallion.toml"));
}

#[test]
fn test_parse_rejects_non_numeric_id() {
    assert!(Cli::try_parse_from(["stallion", "get", "articles", "abc"]).is_err());
}

// =============================================================================
// CONFIGURATION
// =============================================================================

#[test]
fn test_init_writes_loadable_config() {
    let dir = tempdir().expect("Failed to create temp dir");
    let config = init_config(dir.path());

    let settings = load_settings(&config).expect("load");
    let articles = settings.bucket("articles").expect("articles bucket");
    assert_eq!(articles.persister, PersisterKind::Json);
    assert_eq!(articles.unique_keys, vec!["slug"]);
    assert_eq!(articles.keys, vec!["author"]);
    assert!(settings.data_dir.starts_with(dir.path()));
}

#[test]
fn test_init_refuses_overwrite_without_force() {
    let dir = tempdir().expect("Failed to create temp dir");
    let config = init_config(dir.path());

    assert!(matches!(
        cmd_init(&config, false),
        Err(DataError::Config(_))
    ));
    cmd_init(&config, true).expect("forced init");
}

#[test]
fn test_missing_config_is_reported() {
    let dir = tempdir().expect("Failed to create temp dir");
    let result = load_settings(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(DataError::Config(_))));
}

// =============================================================================
// COMMAND FLOW
// =============================================================================

#[test]
fn test_put_persists_across_registries() {
    let dir = tempdir().expect("Failed to create temp dir");
    let config = init_config(dir.path());

    cmd_put(
        &config,
        true,
        "articles",
        r#"{"title": "Hello", "slug": "hello", "author": "ada", "views": 3}"#,
    )
    .expect("put");

    let article = article_by_slug(&config, "hello").expect("saved article");
    assert_eq!(article.get("title"), Some(&FieldValue::from("Hello")));
    assert_eq!(article.get("views"), Some(&FieldValue::Int(3)));
    assert!(article.id().is_some());
}

#[test]
fn test_put_with_id_updates_in_place() {
    let dir = tempdir().expect("Failed to create temp dir");
    let config = init_config(dir.path());

    cmd_put(&config, true, "articles", r#"{"title": "Draft", "slug": "post"}"#).expect("put");
    let id = article_by_slug(&config, "post")
        .and_then(|a| a.id())
        .expect("id");

    let update = format!(r#"{{"id": {}, "title": "Final"}}"#, id.0);
    cmd_put(&config, true, "articles", &update).expect("update");

    let article = article_by_slug(&config, "post").expect("article");
    assert_eq!(article.id(), Some(id));
    assert_eq!(article.get("title"), Some(&FieldValue::from("Final")));
}

#[test]
fn test_soft_delete_hides_and_hard_delete_removes() {
    let dir = tempdir().expect("Failed to create temp dir");
    let config = init_config(dir.path());

    cmd_put(&config, true, "articles", r#"{"title": "Gone", "slug": "gone"}"#).expect("put");
    let id = article_by_slug(&config, "gone")
        .and_then(|a| a.id())
        .expect("id");

    cmd_delete(&config, true, "articles", id.0, false).expect("soft delete");
    assert!(matches!(
        cmd_get(&config, true, "articles", id.0, false),
        Err(DataError::NotFound { .. })
    ));
    cmd_get(&config, true, "articles", id.0, true).expect("visible with deleted");

    cmd_delete(&config, true, "articles", id.0, true).expect("hard delete");
    assert!(matches!(
        cmd_get(&config, true, "articles", id.0, true),
        Err(DataError::NotFound { .. })
    ));
}

#[test]
fn test_list_accepts_filters_and_rejects_bad_ones() {
    let dir = tempdir().expect("Failed to create temp dir");
    let config = init_config(dir.path());

    for (slug, views) in [("a", 1), ("b", 20), ("c", 30)] {
        let json = format!(r#"{{"title": "{}", "slug": "{}", "views": {}}}"#, slug, slug, views);
        cmd_put(&config, true, "articles", &json).expect("put");
    }

    cmd_list(&config, true, &list_args(&["views>=10", "slug:in:b,c"])).expect("list");
    assert!(matches!(
        cmd_list(&config, true, &list_args(&["views"])),
        Err(DataError::Usage(_))
    ));
}

#[test]
fn test_unknown_bucket_is_config_error() {
    let dir = tempdir().expect("Failed to create temp dir");
    let config = init_config(dir.path());

    assert!(matches!(
        cmd_get(&config, true, "missing", 1, false),
        Err(DataError::Config(_))
    ));
    assert!(matches!(
        cmd_reset(&config, true, Some("missing")),
        Err(DataError::Config(_))
    ));
    cmd_reset(&config, true, None).expect("reset all");
}

#[test]
fn test_put_rejects_non_scalar_values() {
    let dir = tempdir().expect("Failed to create temp dir");
    let config = init_config(dir.path());

    assert!(matches!(
        cmd_put(&config, true, "articles", r#"{"slug": "x", "tags": ["a"]}"#),
        Err(DataError::Usage(_))
    ));
    assert!(article_by_slug(&config, "x").is_none());
}
