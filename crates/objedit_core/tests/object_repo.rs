use objedit_core::db::migrations::latest_version;
use objedit_core::db::open_db_in_memory;
use objedit_core::{
    BackendError, CompositeLayout, CompositeSettings, DbError, LinkData, MarkdownData,
    ObjectAttributes, ObjectBackend, ObjectData, ObjectListQuery, ObjectType, ObjectUpsert,
    SqliteObjectRepository, SubobjectRecord, TriState, TypeData, UpsertRequest,
};
use rusqlite::Connection;

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn markdown(id: i64, name: &str) -> ObjectUpsert {
    ObjectUpsert {
        id,
        attributes: ObjectAttributes {
            object_type: ObjectType::Markdown,
            name: name.to_string(),
            ..ObjectAttributes::default()
        },
        type_data: TypeData::Markdown(MarkdownData {
            raw_text: format!("{name} body"),
        }),
    }
}

fn link(id: i64, name: &str) -> ObjectUpsert {
    ObjectUpsert {
        id,
        attributes: ObjectAttributes {
            object_type: ObjectType::Link,
            name: name.to_string(),
            is_published: true,
            ..ObjectAttributes::default()
        },
        type_data: TypeData::Link(LinkData {
            link: "https://example.com".to_string(),
            show_description_as_link: false,
        }),
    }
}

fn composite(id: i64, name: &str) -> ObjectUpsert {
    ObjectUpsert {
        id,
        attributes: ObjectAttributes {
            object_type: ObjectType::Composite,
            name: name.to_string(),
            ..ObjectAttributes::default()
        },
        type_data: TypeData::Composite(CompositeSettings::default()),
    }
}

fn record(child_id: i64, column: u32, row: u32) -> SubobjectRecord {
    SubobjectRecord {
        child_id,
        column,
        row,
        is_expanded: true,
        show_description_composite: TriState::Inherit,
        show_description_as_link_composite: TriState::Inherit,
    }
}

#[test]
fn upsert_assigns_permanent_ids_and_stores_layout() {
    let conn = setup();
    let repo = SqliteObjectRepository::try_new(&conn).unwrap();

    let request = UpsertRequest {
        added: vec![composite(0, "page"), markdown(-1, "first"), link(-2, "second")],
        composite_layouts: vec![CompositeLayout {
            parent_id: 0,
            subobjects: vec![
                SubobjectRecord {
                    show_description_composite: TriState::No,
                    ..record(-1, 0, 0)
                },
                record(-2, 1, 0),
            ],
        }],
        ..UpsertRequest::default()
    };
    let response = repo.upsert_objects(&request).unwrap();

    assert_eq!(response.saved.len(), 3);
    let page = response
        .saved
        .iter()
        .find(|saved| saved.temp_id == Some(0))
        .unwrap();
    let first_id = response
        .saved
        .iter()
        .find(|saved| saved.temp_id == Some(-1))
        .unwrap()
        .object
        .id;
    assert!(page.object.id > 0);
    assert!(first_id > 0);

    let layout = page.object.subobjects();
    assert_eq!(layout.len(), 2);
    assert_eq!(layout[0].child_id, first_id);
    assert_eq!(layout[0].show_description_composite, TriState::No);
    assert_eq!((layout[1].column, layout[1].row), (1, 0));

    let fetched = repo.fetch_objects(&[page.object.id, 999]).unwrap();
    assert_eq!(fetched, vec![page.object.clone()]);
}

#[test]
fn failed_upsert_leaves_database_unchanged() {
    let conn = setup();
    let repo = SqliteObjectRepository::try_new(&conn).unwrap();

    let request = UpsertRequest {
        added: vec![markdown(-1, "new")],
        updated: vec![markdown(77, "missing")],
        ..UpsertRequest::default()
    };
    match repo.upsert_objects(&request).unwrap_err() {
        BackendError::NotFound(ids) => assert_eq!(ids, vec![77]),
        other => panic!("unexpected error: {other}"),
    }

    let page = repo.list_object_ids(&ObjectListQuery::default()).unwrap();
    assert_eq!(page.total, 0);
}

#[test]
fn blank_name_is_rejected_by_server_validation() {
    let conn = setup();
    let repo = SqliteObjectRepository::try_new(&conn).unwrap();

    let request = UpsertRequest {
        added: vec![markdown(-1, "   ")],
        ..UpsertRequest::default()
    };
    let err = repo.upsert_objects(&request).unwrap_err();
    assert!(matches!(err, BackendError::ValidationRejected(_)));
}

#[test]
fn layout_with_unknown_child_is_bad_request() {
    let conn = setup();
    let repo = SqliteObjectRepository::try_new(&conn).unwrap();

    let request = UpsertRequest {
        added: vec![composite(-1, "page")],
        composite_layouts: vec![CompositeLayout {
            parent_id: -1,
            subobjects: vec![record(4040, 0, 0)],
        }],
        ..UpsertRequest::default()
    };
    let err = repo.upsert_objects(&request).unwrap_err();
    assert!(matches!(err, BackendError::BadRequest(_)), "{err}");
}

#[test]
fn delete_reports_not_found_and_densifies_parent_layouts() {
    let conn = setup();
    let repo = SqliteObjectRepository::try_new(&conn).unwrap();
    let response = repo
        .upsert_objects(&UpsertRequest {
            added: vec![
                composite(-1, "page"),
                markdown(-2, "a"),
                markdown(-3, "b"),
                markdown(-4, "c"),
            ],
            composite_layouts: vec![CompositeLayout {
                parent_id: -1,
                subobjects: vec![record(-2, 0, 0), record(-3, 0, 1), record(-4, 0, 2)],
            }],
            ..UpsertRequest::default()
        })
        .unwrap();
    let id_of = |temp_id: i64| {
        response
            .saved
            .iter()
            .find(|saved| saved.temp_id == Some(temp_id))
            .unwrap()
            .object
            .id
    };

    let deleted = repo.delete_objects(&[id_of(-3), 5000]).unwrap();
    assert_eq!(deleted.deleted, vec![id_of(-3)]);
    assert_eq!(deleted.not_found, vec![5000]);

    let page = repo.fetch_objects(&[id_of(-1)]).unwrap().remove(0);
    let positions: Vec<(i64, u32, u32)> = page
        .subobjects()
        .iter()
        .map(|record| (record.child_id, record.column, record.row))
        .collect();
    assert_eq!(positions, vec![(id_of(-2), 0, 0), (id_of(-4), 0, 1)]);
}

#[test]
fn list_filters_and_clamps_pages() {
    let conn = setup();
    let repo = SqliteObjectRepository::try_new(&conn).unwrap();
    repo.upsert_objects(&UpsertRequest {
        added: vec![link(-1, "l1"), link(-2, "l2"), markdown(-3, "m1")],
        ..UpsertRequest::default()
    })
    .unwrap();

    let links = repo
        .list_object_ids(&ObjectListQuery {
            object_type: Some(ObjectType::Link),
            ..ObjectListQuery::default()
        })
        .unwrap();
    assert_eq!(links.total, 2);
    assert_eq!(links.ids.len(), 2);
    assert!(links.ids[0] > links.ids[1], "same-millisecond rows fall back to id DESC");

    let unpublished = repo
        .list_object_ids(&ObjectListQuery {
            is_published: Some(false),
            ..ObjectListQuery::default()
        })
        .unwrap();
    assert_eq!(unpublished.total, 1);

    let paged = repo
        .list_object_ids(&ObjectListQuery {
            limit: Some(1),
            offset: 1,
            ..ObjectListQuery::default()
        })
        .unwrap();
    assert_eq!(paged.total, 3);
    assert_eq!(paged.ids.len(), 1);
}

#[test]
fn malformed_rows_surface_invalid_data() {
    let conn = setup();
    conn.execute(
        "INSERT INTO objects (id, object_type, name, type_data) VALUES (9, 'markdown', 'x', 'not json');",
        [],
    )
    .unwrap();
    let repo = SqliteObjectRepository::try_new(&conn).unwrap();

    let err = repo.fetch_objects(&[9]).unwrap_err();
    assert!(matches!(err, BackendError::InvalidData(_)));
}

#[test]
fn updating_existing_object_replaces_type_data() {
    let conn = setup();
    let repo = SqliteObjectRepository::try_new(&conn).unwrap();
    let saved = repo
        .upsert_objects(&UpsertRequest {
            added: vec![markdown(-1, "draft")],
            ..UpsertRequest::default()
        })
        .unwrap();
    let id = saved.saved[0].object.id;

    let response = repo
        .upsert_objects(&UpsertRequest {
            updated: vec![link(id, "now a link")],
            ..UpsertRequest::default()
        })
        .unwrap();

    let object = &response.saved[0].object;
    assert_eq!(response.saved[0].temp_id, None);
    assert_eq!(object.attributes.name, "now a link");
    assert!(matches!(object.data, ObjectData::Link(_)));
}

#[test]
fn unmigrated_connection_is_rejected() {
    let conn = Connection::open_in_memory().unwrap();
    assert!(matches!(
        SqliteObjectRepository::try_new(&conn),
        Err(BackendError::Db(DbError::SchemaMismatch {
            db_version: 0,
            expected,
        })) if expected == latest_version()
    ));
}
