use super::*;
use crate::raw_sql::SqlParameter;
use crate::testing::MockConnection;
use crate::tests_cfg::{
    archive, blog_row, context, item_row, ledger_model, model, post_row, sales, Blog, BlogSummary,
    Orphan, Post,
};

fn blog(id: i32, url: &str) -> Blog {
    Blog {
        id,
        url: url.to_string(),
        rating: None,
    }
}

fn param(name: &str, value: impl Into<Value>) -> SqlArg {
    SqlArg::Parameter(SqlParameter::new(name, value).unwrap())
}

// ---- execute_command ----

#[test]
fn test_execute_command_returns_affected_rows() {
    let conn = MockConnection::new();
    conn.push_execute_result(3);
    let ctx = context(conn.clone());

    let affected = ctx
        .execute_command("UPDATE posts SET title = upper(title)", false, None, &[])
        .unwrap();

    assert_eq!(affected, 3);
    assert_eq!(conn.begin_count(), 0);
    assert!(!conn.statements()[0].in_transaction);
}

#[test]
fn test_execute_command_binds_named_parameters_in_order() {
    let conn = MockConnection::new();
    let ctx = context(conn.clone());

    ctx.execute_command(
        "UPDATE blogs SET url = @url WHERE id = @id",
        false,
        None,
        &[param("url", "https://example.com"), param("id", 4)],
    )
    .unwrap();

    let statement = &conn.statements()[0];
    assert_eq!(statement.params, vec![Value::from("https://example.com"), Value::from(4)]);
}

#[test]
fn test_ensure_transaction_commits_on_success() {
    let conn = MockConnection::new();
    let ctx = context(conn.clone());

    ctx.execute_command("DELETE FROM posts WHERE blog_id = 1", true, None, &[])
        .unwrap();

    assert_eq!(conn.begin_count(), 1);
    assert_eq!(conn.commit_count(), 1);
    assert!(conn.statements()[0].in_transaction);
    assert_eq!(conn.committed_statements().len(), 1);
    assert_eq!(conn.isolation_levels(), vec![IsolationLevel::ReadCommitted]);
}

#[test]
fn test_ensure_transaction_rolls_back_on_failure() {
    let conn = MockConnection::new();
    conn.push_execute_error("violates foreign key constraint");
    let ctx = context(conn.clone());

    let err = ctx
        .execute_command("DELETE FROM blogs", true, None, &[])
        .unwrap_err();

    assert!(matches!(err, ContextError::Execution { .. }));
    assert_eq!(conn.rollback_count(), 1);
    assert_eq!(conn.commit_count(), 0);
    assert!(!conn.in_transaction());
    assert!(conn.committed_statements().is_empty());
}

#[test]
fn test_failed_commit_surfaces_as_transaction_error() {
    let conn = MockConnection::new();
    conn.fail_next_commit("could not serialize access");
    let ctx = context(conn.clone());

    let err = ctx
        .execute_command("UPDATE blogs SET stars = 5", true, None, &[])
        .unwrap_err();

    assert!(matches!(err, ContextError::Transaction(_)));
    assert!(!conn.in_transaction());
    assert!(conn.committed_statements().is_empty());
}

#[test]
fn test_ambient_transaction_is_joined() {
    let conn = MockConnection::new();
    let ctx = context(conn.clone());
    ctx.connection().begin(IsolationLevel::Serializable).unwrap();

    ctx.execute_command("UPDATE blogs SET stars = 1", true, None, &[])
        .unwrap();

    assert_eq!(conn.begin_count(), 1);
    assert_eq!(conn.commit_count(), 0);
    assert!(conn.in_transaction());
    assert!(conn.committed_statements().is_empty());
}

#[test]
fn test_timeout_override_is_restored() {
    let conn = MockConnection::new();
    let ctx = DataContext::builder(conn.clone())
        .model(model())
        .default_command_timeout(Duration::from_secs(30))
        .build()
        .unwrap();

    ctx.execute_command("VACUUM ANALYZE blogs", false, Some(Duration::from_secs(300)), &[])
        .unwrap();

    assert_eq!(conn.statements()[0].timeout, Some(Duration::from_secs(300)));
    assert_eq!(ctx.connection().command_timeout(), Some(Duration::from_secs(30)));
    assert_eq!(
        conn.timeout_history(),
        vec![
            Some(Duration::from_secs(30)),
            Some(Duration::from_secs(300)),
            Some(Duration::from_secs(30)),
        ]
    );
}

#[test]
fn test_timeout_is_restored_after_failure() {
    let conn = MockConnection::new();
    conn.push_execute_error("canceling statement due to statement timeout");
    let ctx = context(conn.clone());

    let result = ctx.execute_command("SELECT pg_sleep(10)", true, Some(Duration::from_millis(50)), &[]);

    assert!(result.is_err());
    assert_eq!(ctx.connection().command_timeout(), None);
    assert_eq!(conn.rollback_count(), 1);
}

#[test]
fn test_timeout_is_restored_after_failed_commit() {
    let conn = MockConnection::new();
    conn.fail_next_commit("connection reset");
    let ctx = context(conn.clone());

    let result = ctx.execute_command("UPDATE blogs SET stars = 2", true, Some(Duration::from_secs(1)), &[]);

    assert!(result.is_err());
    assert_eq!(conn.timeout_history().last(), Some(&None));
}

#[test]
fn test_no_timeout_argument_leaves_timeout_alone() {
    let conn = MockConnection::new();
    let ctx = context(conn.clone());
    ctx.execute_command("SELECT 1", false, None, &[]).unwrap();
    assert!(conn.timeout_history().is_empty());
}

// ---- raw queries ----

#[test]
fn test_raw_query_appends_markers() {
    let ctx = context(MockConnection::new());
    let query = ctx
        .raw_query::<Blog>(
            "EXEC blogs_by_rating",
            vec![param("min", 3), SqlArg::Parameter(SqlParameter::output("total", 0).unwrap())],
        )
        .unwrap();
    assert_eq!(query.sql(), "EXEC blogs_by_rating @min, @total OUTPUT");
}

#[test]
fn test_raw_query_without_parameters_keeps_text() {
    let ctx = context(MockConnection::new());
    let query = ctx.raw_query::<Blog>("SELECT * FROM blogs", vec![]).unwrap();
    assert_eq!(query.sql(), "SELECT * FROM blogs");
}

#[test]
fn test_raw_query_is_lazy_and_reruns() {
    let conn = MockConnection::new();
    conn.push_query_result(vec![blog_row(1, "a", Some(4))])
        .push_query_result(vec![blog_row(1, "a", Some(4)), blog_row(2, "b", None)]);
    let ctx = context(conn.clone());

    let query = ctx
        .raw_query::<Blog>("SELECT * FROM blogs WHERE stars >=", vec![param("min", 3)])
        .unwrap();
    assert!(conn.statements().is_empty());

    let first = query.load().unwrap();
    let second: Vec<_> = query.iter().unwrap().collect();

    assert_eq!(conn.statements().len(), 2);
    assert_eq!(conn.statements()[0].sql, "SELECT * FROM blogs WHERE stars >= @min");
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 2);
    assert_eq!(first[0].borrow().rating, Some(4));
    // Same key, same instance
    assert!(Tracked::ptr_eq(&first[0], &second[0]));
}

#[test]
fn test_raw_query_materialization_failure() {
    let conn = MockConnection::new();
    conn.push_query_result(vec![DataRow::new().with("id", "not a number")]);
    let ctx = context(conn);

    let err = ctx.raw_query::<Blog>("SELECT id FROM blogs", vec![]).unwrap().load().unwrap_err();
    assert!(matches!(err, ContextError::Materialization { .. }));
}

#[test]
fn test_raw_query_no_tracking() {
    let conn = MockConnection::new();
    conn.push_query_result(vec![blog_row(1, "a", None)]);
    let ctx = context(conn);

    let blogs = ctx.raw_query::<Blog>("SELECT * FROM blogs", vec![]).unwrap().no_tracking().unwrap();
    assert_eq!(blogs, vec![blog(1, "a")]);
    assert_eq!(ctx.tracked_count(), 0);
}

#[test]
fn test_raw_query_for_unmapped_entity() {
    let ctx = context(MockConnection::new());
    let err = ctx.raw_query::<Orphan>("SELECT 1", vec![]).err().unwrap();
    assert!(matches!(err, ContextError::Configuration { .. }));
}

#[test]
fn test_raw_projection_query() {
    let conn = MockConnection::new();
    conn.push_query_result(vec![DataRow::new().with("url", "a").with("posts", 3i64)]);
    let ctx = context(conn.clone());

    let query = ctx
        .raw_query_projection::<BlogSummary>("SELECT url, count(*) AS posts FROM blogs GROUP BY url")
        .unwrap();
    let summaries = query.load().unwrap();

    assert_eq!(
        summaries,
        vec![BlogSummary {
            url: "a".into(),
            post_count: 3
        }]
    );
    assert_eq!(ctx.tracked_count(), 0);
    assert!(conn.statements()[0].params.is_empty());
}

#[test]
fn test_raw_projection_query_for_unmapped_type() {
    let ctx = context(MockConnection::new());
    let err = ctx.raw_query_projection::<Orphan>("SELECT 1 AS id").err().unwrap();
    assert!(matches!(err, ContextError::Configuration { ref target, .. } if target == "Orphan"));
}

#[test]
fn test_query_reads_configured_view() {
    let conn = MockConnection::new();
    let ctx = context(conn.clone());
    let query = ctx.query::<BlogSummary>().unwrap();
    assert_eq!(query.sql(), "SELECT url, posts FROM blog_summaries");
    assert!(query.first().unwrap().is_none());
    assert_eq!(conn.statements().len(), 1);
}

// ---- call_procedure ----

#[test]
fn test_call_procedure_reads_outputs() {
    let conn = MockConnection::new();
    conn.push_query_result(vec![DataRow::new().with("total", 12i64).with("status", "ok")]);
    let ctx = context(conn.clone());

    let outputs = ctx
        .call_procedure(
            "CALL count_posts(",
            &[
                param("blog_id", 1),
                SqlArg::Parameter(SqlParameter::output("total", Value::BigInt(None)).unwrap()),
                SqlArg::Parameter(SqlParameter::input_output("status", "pending").unwrap()),
            ],
        )
        .unwrap();

    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs["total"], Value::from(12i64));
    assert_eq!(outputs["status"], Value::from("ok"));
    assert_eq!(
        conn.statements()[0].sql,
        "CALL count_posts( @blog_id, @total OUTPUT, @status OUTPUT"
    );
}

#[test]
fn test_call_procedure_missing_output() {
    let conn = MockConnection::new();
    conn.push_query_result(vec![DataRow::new().with("other", 1)]);
    let ctx = context(conn);

    let err = ctx
        .call_procedure(
            "CALL p",
            &[SqlArg::Parameter(SqlParameter::output("total", 0).unwrap())],
        )
        .unwrap_err();
    assert!(matches!(err, ContextError::Materialization { .. }));
}

#[test]
fn test_call_procedure_without_outputs() {
    let ctx = context(MockConnection::new());
    let outputs = ctx.call_procedure("CALL refresh_stats", &[]).unwrap();
    assert!(outputs.is_empty());
}

// ---- sets ----

#[test]
fn test_set_for_unmapped_entity() {
    let ctx = context(MockConnection::new());
    let err = ctx.set::<Orphan>().err().unwrap();
    assert!(matches!(err, ContextError::Configuration { .. }));
}

#[test]
fn test_find_queries_once_then_uses_tracker() {
    let conn = MockConnection::new();
    conn.push_query_result(vec![blog_row(5, "e", None)]);
    let ctx = context(conn.clone());
    let blogs = ctx.set::<Blog>().unwrap();

    let first = blogs.find(5).unwrap().unwrap();
    let again = blogs.find(5).unwrap().unwrap();

    assert!(Tracked::ptr_eq(&first, &again));
    assert_eq!(conn.statements().len(), 1);
    assert!(conn.statements()[0].sql.starts_with(r#"SELECT "id", "url", "stars" FROM "blogs""#));
    assert_eq!(conn.statements()[0].params, vec![Value::from(5)]);
}

#[test]
fn test_find_missing_row() {
    let ctx = context(MockConnection::new());
    assert!(ctx.set::<Blog>().unwrap().find(404).unwrap().is_none());
}

#[test]
fn test_find_with_wrong_key_arity() {
    let ctx = context(MockConnection::new());
    let err = ctx
        .set::<Blog>()
        .unwrap()
        .find_by_key(vec![Value::from(1), Value::from(2)])
        .err()
        .unwrap();
    assert!(matches!(err, ContextError::InvalidArgument(_)));
}

#[test]
fn test_filter_eq_uses_mapped_column() {
    let conn = MockConnection::new();
    conn.push_query_result(vec![blog_row(1, "a", Some(5)), blog_row(2, "b", Some(5))]);
    let ctx = context(conn.clone());

    let found = ctx.set::<Blog>().unwrap().filter_eq("rating", 5).unwrap();

    assert_eq!(found.len(), 2);
    assert!(conn.statements()[0].sql.contains(r#"WHERE "stars" = $1"#));
    assert_eq!(ctx.tracked_count(), 2);
}

#[test]
fn test_filter_eq_unknown_property() {
    let ctx = context(MockConnection::new());
    let err = ctx.set::<Blog>().unwrap().filter_eq("author", 1).err().unwrap();
    assert!(matches!(err, ContextError::InvalidArgument(_)));
}

#[test]
fn test_untracked_reads() {
    let conn = MockConnection::new();
    conn.push_query_result(vec![post_row(1, 1, "hello")]);
    let ctx = context(conn);

    let posts = ctx.set::<Post>().unwrap().no_tracking().all().unwrap();
    assert_eq!(posts[0].title, "hello");
    assert_eq!(ctx.tracked_count(), 0);
}

#[test]
fn test_count() {
    let conn = MockConnection::new();
    conn.push_query_result(vec![DataRow::new().with("count", 17i64)]);
    let ctx = context(conn.clone());

    assert_eq!(ctx.set::<Post>().unwrap().count().unwrap(), 17);
    assert!(conn.statements()[0].sql.starts_with("SELECT COUNT(*)"));
}

#[test]
fn test_local_lists_tracked_entities() {
    let conn = MockConnection::new();
    conn.push_query_result(vec![blog_row(1, "a", None)]);
    let ctx = context(conn);
    let blogs = ctx.set::<Blog>().unwrap();

    let _loaded = blogs.all().unwrap();
    let _added = blogs.add(blog(0, "new"));
    assert_eq!(blogs.local().len(), 2);
}

// ---- detach ----

#[test]
fn test_detach_none_is_rejected_and_tracking_unchanged() {
    let conn = MockConnection::new();
    conn.push_query_result(vec![blog_row(1, "a", None)]);
    let ctx = context(conn);
    let _loaded = ctx.set::<Blog>().unwrap().all().unwrap();

    let err = ctx.detach::<Blog>(None).unwrap_err();

    assert!(matches!(err, ContextError::InvalidArgument(_)));
    assert_eq!(ctx.tracked_count(), 1);
}

#[test]
fn test_detached_changes_are_not_saved() {
    let conn = MockConnection::new();
    conn.push_query_result(vec![blog_row(1, "a", None)]);
    let ctx = context(conn.clone());

    let loaded = ctx.set::<Blog>().unwrap().find(1).unwrap().unwrap();
    ctx.detach(Some(&loaded)).unwrap();
    loaded.borrow_mut().url = "changed".into();

    assert_eq!(ctx.entry_state(&loaded), EntityState::Detached);
    assert!(!ctx.has_changes());
    assert_eq!(ctx.save_changes().unwrap(), 0);
    assert_eq!(conn.statements().len(), 1);
}

#[test]
fn test_detach_untracked_is_noop() {
    let ctx = context(MockConnection::new());
    let stray = Tracked::new(blog(1, "a"));
    ctx.detach(Some(&stray)).unwrap();
    assert_eq!(ctx.tracked_count(), 0);
}

// ---- save_changes ----

#[test]
fn test_save_inserts_and_reads_back_generated_key() {
    let conn = MockConnection::new();
    conn.push_query_result(vec![DataRow::new().with("id", 10)]);
    let ctx = context(conn.clone());

    let added = ctx.set::<Blog>().unwrap().add(blog(0, "https://new.example"));
    assert_eq!(ctx.entry_state(&added), EntityState::Added);

    assert_eq!(ctx.save_changes().unwrap(), 1);

    assert_eq!(added.borrow().id, 10);
    assert_eq!(ctx.entry_state(&added), EntityState::Unchanged);
    assert_eq!(conn.begin_count(), 1);
    assert_eq!(conn.commit_count(), 1);
    let insert = &conn.statements()[0];
    assert!(insert.sql.starts_with(r#"INSERT INTO "blogs""#));
    assert!(insert.in_transaction);

    // Tracked under its new key
    let found = ctx.set::<Blog>().unwrap().find(10).unwrap().unwrap();
    assert!(Tracked::ptr_eq(&found, &added));
}

#[test]
fn test_save_updates_changed_columns_only() {
    let conn = MockConnection::new();
    conn.push_query_result(vec![blog_row(1, "a", None)]);
    let ctx = context(conn.clone());

    let loaded = ctx.set::<Blog>().unwrap().find(1).unwrap().unwrap();
    loaded.borrow_mut().rating = Some(3);
    assert_eq!(ctx.entry_state(&loaded), EntityState::Modified);

    assert_eq!(ctx.save_changes().unwrap(), 1);

    let update = &conn.statements()[1];
    assert!(update.sql.starts_with(r#"UPDATE "blogs" SET "stars" = $1"#));
    assert!(!update.sql.contains(r#""url""#));
    assert_eq!(update.params, vec![Value::from(3), Value::from(1)]);
    assert_eq!(ctx.entry_state(&loaded), EntityState::Unchanged);
    assert!(!ctx.has_changes());
}

#[test]
fn test_save_deletes_removed_entities() {
    let conn = MockConnection::new();
    conn.push_query_result(vec![post_row(8, 1, "bye")]);
    let ctx = context(conn.clone());
    let posts = ctx.set::<Post>().unwrap();

    let post = posts.find(8).unwrap().unwrap();
    posts.remove(&post).unwrap();
    assert_eq!(ctx.entry_state(&post), EntityState::Deleted);

    ctx.save_changes().unwrap();

    assert!(conn.statements()[1].sql.starts_with(r#"DELETE FROM "posts""#));
    assert_eq!(ctx.entry_state(&post), EntityState::Detached);
    assert_eq!(ctx.tracked_count(), 0);
}

#[test]
fn test_save_without_changes_touches_nothing() {
    let conn = MockConnection::new();
    let ctx = context(conn.clone());
    assert_eq!(ctx.save_changes().unwrap(), 0);
    assert_eq!(conn.begin_count(), 0);
}

#[test]
fn test_stale_update_rolls_back_and_keeps_changes() {
    let conn = MockConnection::new();
    conn.push_query_result(vec![blog_row(1, "a", None), blog_row(2, "b", None)]);
    let ctx = context(conn.clone());

    let blogs = ctx.set::<Blog>().unwrap().all().unwrap();
    blogs[0].borrow_mut().url = "a2".into();
    blogs[1].borrow_mut().url = "b2".into();
    conn.push_execute_result(1).push_execute_result(0);

    let err = ctx.save_changes().unwrap_err();

    assert!(matches!(err, ContextError::Execution { .. }));
    assert_eq!(conn.rollback_count(), 1);
    assert!(conn.committed_statements().is_empty());
    assert_eq!(ctx.entry_state(&blogs[0]), EntityState::Modified);
    assert_eq!(ctx.entry_state(&blogs[1]), EntityState::Modified);
}

#[test]
fn test_save_keeps_changes_of_same_named_entity() {
    let conn = MockConnection::new();
    conn.push_query_result(vec![item_row(1, "desk")])
        .push_query_result(vec![item_row(1, "desk")]);
    let ctx = DataContext::builder(conn.clone())
        .model(ledger_model())
        .build()
        .unwrap();

    let current = ctx.set::<sales::Item>().unwrap().find(1).unwrap().unwrap();
    current.borrow_mut().name = "changed".into();
    let archived = ctx.set::<archive::Item>().unwrap().find(1).unwrap().unwrap();

    assert_eq!(ctx.tracked_count(), 2);
    assert_eq!(ctx.save_changes().unwrap(), 1);

    let update = &conn.committed_statements()[0];
    assert!(update.sql.starts_with(r#"UPDATE "sales"."items" SET "name" = $1"#));
    assert_eq!(update.params, vec![Value::from("changed"), Value::from(1)]);
    assert_eq!(ctx.entry_state(&archived), EntityState::Unchanged);
}

#[test]
fn test_save_rejects_changed_key() {
    let conn = MockConnection::new();
    conn.push_query_result(vec![blog_row(1, "a", None)]);
    let ctx = context(conn.clone());

    let loaded = ctx.set::<Blog>().unwrap().find(1).unwrap().unwrap();
    loaded.borrow_mut().id = 5;

    let err = ctx.save_changes().unwrap_err();
    assert!(matches!(err, ContextError::InvalidArgument(_)));
    assert_eq!(conn.begin_count(), 0);
    assert_eq!(conn.statements().len(), 1);
    assert_eq!(ctx.entry_state(&loaded), EntityState::Modified);
}

#[test]
fn test_failed_commit_keeps_changes_for_retry() {
    let conn = MockConnection::new();
    conn.push_query_result(vec![blog_row(1, "a", None)]);
    let ctx = context(conn.clone());

    let loaded = ctx.set::<Blog>().unwrap().find(1).unwrap().unwrap();
    loaded.borrow_mut().rating = Some(1);
    conn.fail_next_commit("serialization failure");

    assert!(matches!(ctx.save_changes(), Err(ContextError::Transaction(_))));
    assert!(ctx.has_changes());

    assert_eq!(ctx.save_changes().unwrap(), 1);
    assert!(!ctx.has_changes());
}

#[test]
fn test_save_joins_ambient_transaction() {
    let conn = MockConnection::new();
    let ctx = context(conn.clone());
    ctx.connection().begin(IsolationLevel::ReadCommitted).unwrap();

    let post = ctx
        .set::<Post>()
        .unwrap()
        .attach(Post {
            id: 3,
            blog_id: 1,
            title: "t".into(),
            body: None,
        })
        .unwrap();
    post.borrow_mut().title = "t2".into();
    ctx.save_changes().unwrap();

    assert_eq!(conn.begin_count(), 1);
    assert_eq!(conn.commit_count(), 0);
    assert!(conn.in_transaction());
}

#[test]
fn test_isolation_level_applies_to_opened_transactions() {
    let conn = MockConnection::new();
    let ctx = DataContext::builder(conn.clone())
        .model(model())
        .isolation_level(IsolationLevel::RepeatableRead)
        .build()
        .unwrap();

    ctx.execute_command("UPDATE blogs SET stars = 0", true, None, &[]).unwrap();
    assert_eq!(conn.isolation_levels(), vec![IsolationLevel::RepeatableRead]);
}

#[test]
fn test_generate_create_script_delegates_to_model() {
    let ctx = context(MockConnection::new());
    assert_eq!(ctx.generate_create_script(), model().generate_create_script());
}
