use objedit_core::db::open_db_in_memory;
use objedit_core::{
    AttachOutcome, BackendError, BackendResult, CompositeLayout, CompositeSettings, DeleteMode,
    DeleteResponse, EditedObject, MarkdownData, MarkdownPatch, MoveTarget, ObjectAttributes,
    ObjectBackend, ObjectEditor, ObjectIdPage, ObjectListQuery, ObjectPatch, ObjectType,
    ObjectUpsert, PersistedObject, SaveError, SaveStart, SqliteObjectRepository, SubobjectPatch,
    SubobjectRecord, TriState, TypeData, UpsertRequest, UpsertResponse, ValidationError,
};
use rusqlite::Connection;
use std::cell::RefCell;

/// SQLite backend that records upserts and can fail the next one.
struct RecordingBackend<'conn> {
    inner: SqliteObjectRepository<'conn>,
    upserts: RefCell<Vec<UpsertRequest>>,
    fail_next_upsert: RefCell<Option<BackendError>>,
}

impl<'conn> RecordingBackend<'conn> {
    fn new(conn: &'conn Connection) -> Self {
        Self {
            inner: SqliteObjectRepository::try_new(conn).unwrap(),
            upserts: RefCell::new(Vec::new()),
            fail_next_upsert: RefCell::new(None),
        }
    }

    fn fail_next(&self, err: BackendError) {
        *self.fail_next_upsert.borrow_mut() = Some(err);
    }

    fn last_upsert(&self) -> UpsertRequest {
        self.upserts.borrow().last().cloned().unwrap()
    }

    fn upsert_count(&self) -> usize {
        self.upserts.borrow().len()
    }

    /// Creates persisted objects directly and returns their ids in order.
    fn seed(&self, objects: Vec<ObjectUpsert>) -> Vec<i64> {
        let temp_ids: Vec<i64> = objects.iter().map(|object| object.id).collect();
        let response = self
            .inner
            .upsert_objects(&UpsertRequest {
                added: objects,
                ..UpsertRequest::default()
            })
            .unwrap();
        temp_ids
            .iter()
            .map(|temp_id| {
                response
                    .saved
                    .iter()
                    .find(|saved| saved.temp_id == Some(*temp_id))
                    .unwrap()
                    .object
                    .id
            })
            .collect()
    }
}

impl ObjectBackend for RecordingBackend<'_> {
    fn fetch_objects(&self, ids: &[i64]) -> BackendResult<Vec<PersistedObject>> {
        self.inner.fetch_objects(ids)
    }

    fn list_object_ids(&self, query: &ObjectListQuery) -> BackendResult<ObjectIdPage> {
        self.inner.list_object_ids(query)
    }

    fn upsert_objects(&self, request: &UpsertRequest) -> BackendResult<UpsertResponse> {
        self.upserts.borrow_mut().push(request.clone());
        if let Some(err) = self.fail_next_upsert.borrow_mut().take() {
            return Err(err);
        }
        self.inner.upsert_objects(request)
    }

    fn delete_objects(&self, ids: &[i64]) -> BackendResult<DeleteResponse> {
        self.inner.delete_objects(ids)
    }
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
            raw_text: format!("{name} text"),
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

fn markdown_patch(name: &str) -> ObjectPatch {
    ObjectPatch {
        object_type: Some(ObjectType::Markdown),
        name: Some(name.to_string()),
        markdown: Some(MarkdownPatch {
            raw_text: Some(format!("{name} text")),
        }),
        ..ObjectPatch::default()
    }
}

fn composite_patch(name: &str) -> ObjectPatch {
    ObjectPatch {
        object_type: Some(ObjectType::Composite),
        name: Some(name.to_string()),
        ..ObjectPatch::default()
    }
}

/// Persisted composite with markdown children in one column.
fn seed_page(backend: &RecordingBackend<'_>, children: usize) -> (i64, Vec<i64>) {
    let child_ids = backend.seed(
        (1..=children)
            .map(|index| markdown(-(index as i64), &format!("child {index}")))
            .collect(),
    );
    let response = backend
        .inner
        .upsert_objects(&UpsertRequest {
            added: vec![composite(-1, "page")],
            composite_layouts: vec![CompositeLayout {
                parent_id: -1,
                subobjects: child_ids
                    .iter()
                    .enumerate()
                    .map(|(row, id)| record(*id, 0, row as u32))
                    .collect(),
            }],
            ..UpsertRequest::default()
        })
        .unwrap();
    (response.saved[0].object.id, child_ids)
}

fn snapshot<B: ObjectBackend>(editor: &ObjectEditor<B>) -> (Vec<(i64, EditedObject)>, Vec<PersistedObject>) {
    let sessions = editor
        .sessions()
        .iter()
        .map(|(id, session)| (id, session.clone()))
        .collect();
    let objects = editor
        .objects()
        .ids()
        .filter_map(|id| editor.objects().get(id).cloned())
        .collect();
    (sessions, objects)
}

#[test]
fn position_swap_sends_only_layout() {
    let conn = open_db_in_memory().unwrap();
    let backend = RecordingBackend::new(&conn);
    let (page_id, children) = seed_page(&backend, 3);
    let mut editor = ObjectEditor::new(&backend);
    editor.load_objects(&[page_id]).unwrap();
    editor.open_session(page_id).unwrap();

    editor.move_subobject(page_id, children[1], MoveTarget::OntoCard(children[0]));
    editor.save(page_id).unwrap();

    let request = backend.last_upsert();
    assert!(request.added.is_empty());
    assert!(request.updated.is_empty());
    assert!(request.deleted_object_ids.is_empty());
    assert_eq!(request.composite_layouts.len(), 1);

    let previous = vec![
        record(children[0], 0, 0),
        record(children[1], 0, 1),
        record(children[2], 0, 2),
    ];
    let changed = request.composite_layouts[0].changed_from(&previous);
    assert_eq!(
        changed,
        vec![record(children[1], 0, 0), record(children[0], 0, 1)]
    );

    let wire = serde_json::to_value(&request).unwrap();
    assert_eq!(wire["composite_layouts"][0]["parent_id"], page_id);
    assert_eq!(wire["composite_layouts"][0]["subobjects"][0]["child_id"], children[1]);

    assert!(!editor.is_modified(page_id));
    let stored = editor.objects().get(page_id).unwrap();
    assert_eq!(stored.subobjects()[0].child_id, children[1]);
}

#[test]
fn save_remaps_every_temporary_id() {
    let conn = open_db_in_memory().unwrap();
    let backend = RecordingBackend::new(&conn);
    let (other_page, _) = seed_page(&backend, 1);
    let mut editor = ObjectEditor::new(&backend);
    editor.load_objects(&[other_page]).unwrap();
    editor.open_session(other_page).unwrap();

    editor.open_session(0).unwrap();
    editor.update(0, composite_patch("new page")).unwrap();
    let first = editor.create_new_subobject_session(0).unwrap();
    let second = editor.create_new_subobject_session(0).unwrap();
    editor.update(first, markdown_patch("first")).unwrap();
    editor.update(second, markdown_patch("second")).unwrap();
    assert_eq!(
        editor.attach_existing_subobject(other_page, first).unwrap(),
        AttachOutcome::Attached
    );

    let report = editor.save(0).unwrap();

    assert_eq!(report.id_map.len(), 3);
    assert!(report.root_id > 0);
    let temporary: Vec<i64> = report.id_map.keys().copied().collect();
    for (id, session) in editor.sessions().iter() {
        assert!(id > 0, "session still keyed by {id}");
        for child_id in session.composite.subobjects.keys() {
            assert!(!temporary.contains(child_id), "link still keyed by {child_id}");
        }
    }
    let first_id = report.id_map[&first];
    assert!(editor
        .session(other_page)
        .unwrap()
        .composite
        .subobjects
        .contains_key(&first_id));
    assert_eq!(editor.session(first_id).unwrap().attributes.name, "first");

    let fresh = editor.open_session(0).unwrap();
    assert_eq!(fresh, &EditedObject::default());
}

#[test]
fn failed_save_leaves_stores_untouched_and_can_be_retried() {
    let conn = open_db_in_memory().unwrap();
    let backend = RecordingBackend::new(&conn);
    let mut editor = ObjectEditor::new(&backend);
    editor.open_session(0).unwrap();
    editor.update(0, composite_patch("page")).unwrap();
    let child = editor.create_new_subobject_session(0).unwrap();
    editor.update(child, markdown_patch("child")).unwrap();
    let before = snapshot(&editor);

    backend.fail_next(BackendError::ServerError("upstream down".to_string()));
    let err = editor.save(0).unwrap_err();

    assert!(matches!(err, SaveError::Backend(BackendError::ServerError(_))));
    assert_eq!(snapshot(&editor), before);
    assert_eq!(
        editor.session_error(0),
        Some("server error: upstream down")
    );
    assert!(!editor.is_save_pending(0));

    let report = editor.save(0).unwrap();
    assert_eq!(backend.upsert_count(), 2);
    assert_eq!(editor.session_error(0), None);
    assert_eq!(editor.session_error(report.root_id), None);
}

#[test]
fn validation_failure_sends_nothing() {
    let conn = open_db_in_memory().unwrap();
    let backend = RecordingBackend::new(&conn);
    let mut editor = ObjectEditor::new(&backend);
    editor.open_session(0).unwrap();
    editor.update(0, composite_patch("page")).unwrap();
    let child = editor.create_new_subobject_session(0).unwrap();
    editor.update(child, markdown_patch("  ")).unwrap();

    match editor.save(0).unwrap_err() {
        SaveError::Validation { object_id, error } => {
            assert_eq!(object_id, child);
            assert_eq!(error, ValidationError::EmptyName);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(backend.upsert_count(), 0);
    assert!(editor.session_error(child).is_some());
    assert!(editor.session(child).is_some());
}

#[test]
fn duplicate_save_is_ignored_while_in_flight() {
    let conn = open_db_in_memory().unwrap();
    let backend = RecordingBackend::new(&conn);
    let mut editor = ObjectEditor::new(&backend);
    editor.open_session(0).unwrap();
    editor.update(0, markdown_patch("note")).unwrap();

    let ticket = match editor.begin_save(0).unwrap() {
        SaveStart::Ready(ticket) => ticket,
        SaveStart::NothingToSave => panic!("new object must be sent"),
    };
    assert!(editor.is_save_pending(0));
    assert!(matches!(
        editor.begin_save(0),
        Err(SaveError::AlreadyInFlight(0))
    ));

    let response = backend.upsert_objects(ticket.request());
    let report = editor.complete_save(ticket, response).unwrap();
    assert!(!editor.is_save_pending(0));
    assert!(report.root_id > 0);
}

#[test]
fn response_without_id_mapping_is_rejected_before_mutation() {
    let conn = open_db_in_memory().unwrap();
    let backend = RecordingBackend::new(&conn);
    let mut editor = ObjectEditor::new(&backend);
    editor.open_session(0).unwrap();
    editor.update(0, markdown_patch("note")).unwrap();
    let before = snapshot(&editor);

    let SaveStart::Ready(ticket) = editor.begin_save(0).unwrap() else {
        panic!("new object must be sent");
    };
    let err = editor
        .complete_save(ticket, Ok(UpsertResponse::default()))
        .unwrap_err();

    assert!(matches!(err, SaveError::Backend(BackendError::InvalidData(_))));
    assert_eq!(snapshot(&editor), before);
}

#[test]
fn unmodified_page_needs_no_request() {
    let conn = open_db_in_memory().unwrap();
    let backend = RecordingBackend::new(&conn);
    let (page_id, _) = seed_page(&backend, 2);
    let mut editor = ObjectEditor::new(&backend);
    editor.load_objects(&[page_id]).unwrap();
    editor.open_session(page_id).unwrap();

    assert_eq!(editor.begin_save(page_id).unwrap(), SaveStart::NothingToSave);
    let report = editor.save(page_id).unwrap();
    assert_eq!(report.root_id, page_id);
    assert!(report.id_map.is_empty());
    assert_eq!(backend.upsert_count(), 0);
}

#[test]
fn nested_composite_edits_are_not_part_of_parent_save() {
    let conn = open_db_in_memory().unwrap();
    let backend = RecordingBackend::new(&conn);
    let (inner_page, _) = seed_page(&backend, 1);
    let (outer_page, outer_children) = seed_page(&backend, 1);
    let mut editor = ObjectEditor::new(&backend);
    editor.load_objects(&[outer_page, inner_page]).unwrap();
    editor.open_session(outer_page).unwrap();
    editor.open_session(inner_page).unwrap();
    editor
        .attach_existing_subobject(outer_page, inner_page)
        .unwrap();

    editor
        .update(inner_page, ObjectPatch::name("renamed nested page"))
        .unwrap();
    editor
        .update(outer_children[0], ObjectPatch::name("renamed child"))
        .unwrap();
    editor.save(outer_page).unwrap();

    let request = backend.last_upsert();
    let updated: Vec<i64> = request.updated.iter().map(|object| object.id).collect();
    assert_eq!(updated, vec![outer_children[0]]);
    assert_eq!(request.composite_layouts.len(), 1);
    assert!(editor.is_modified(inner_page));
}

#[test]
fn mixed_save_keeps_four_links_and_drops_full_delete() {
    let conn = open_db_in_memory().unwrap();
    let backend = RecordingBackend::new(&conn);
    let existing = backend.seed(vec![
        markdown(-1, "e1"),
        markdown(-2, "e2"),
        markdown(-3, "e3"),
        markdown(-4, "e4"),
    ]);
    let mut editor = ObjectEditor::new(&backend);
    editor.open_session(0).unwrap();
    editor.update(0, composite_patch("mixed page")).unwrap();

    for id in &existing {
        assert_eq!(
            editor.attach_existing_subobject(0, *id).unwrap(),
            AttachOutcome::Attached
        );
    }
    let mut created = Vec::new();
    for name in ["n1", "n2", "n3"] {
        let id = editor.create_new_subobject_session(0).unwrap();
        editor.update(id, markdown_patch(name)).unwrap();
        created.push(id);
    }
    for (child_id, delete_mode) in [
        (existing[1], DeleteMode::SubobjectOnly),
        (created[2], DeleteMode::SubobjectOnly),
        (existing[3], DeleteMode::Full),
    ] {
        editor
            .update_subobject(
                0,
                child_id,
                SubobjectPatch {
                    delete_mode: Some(delete_mode),
                    ..SubobjectPatch::default()
                },
            )
            .unwrap();
    }

    let report = editor.save(0).unwrap();

    let request = backend.last_upsert();
    assert_eq!(request.added.len(), 3);
    assert!(request.updated.is_empty());
    assert_eq!(request.deleted_object_ids, vec![existing[3]]);

    let saved_page = editor.objects().get(report.root_id).unwrap();
    assert_eq!(saved_page.subobjects().len(), 4);
    let linked: Vec<i64> = saved_page
        .subobjects()
        .iter()
        .map(|record| record.child_id)
        .collect();
    assert!(linked.contains(&existing[0]));
    assert!(linked.contains(&existing[2]));
    assert!(linked.contains(&report.id_map[&created[0]]));
    assert!(linked.contains(&report.id_map[&created[1]]));

    assert!(editor.objects().get(existing[3]).is_none());
    assert!(editor.session(existing[3]).is_none());
    assert!(backend.fetch_objects(&[existing[3]]).unwrap().is_empty());
    assert!(editor.objects().get(existing[1]).is_some());
    assert!(editor.session(created[2]).is_none());
    assert!(!report.id_map.contains_key(&created[2]));
    assert_eq!(report.deleted, vec![existing[3]]);
}

#[test]
fn edits_made_while_save_is_in_flight_survive_completion() {
    let conn = open_db_in_memory().unwrap();
    let backend = RecordingBackend::new(&conn);
    let mut editor = ObjectEditor::new(&backend);
    editor.open_session(0).unwrap();
    editor.update(0, composite_patch("page")).unwrap();
    let first = editor.create_new_subobject_session(0).unwrap();
    editor.update(first, markdown_patch("first")).unwrap();
    let untouched = editor.create_new_subobject_session(0).unwrap();
    editor.update(untouched, markdown_patch("untouched")).unwrap();

    let SaveStart::Ready(ticket) = editor.begin_save(0).unwrap() else {
        panic!("new page must be sent");
    };
    editor
        .update(0, ObjectPatch::name("renamed while saving"))
        .unwrap();
    editor
        .update(first, ObjectPatch::name("first, edited while saving"))
        .unwrap();
    let late = editor.create_new_subobject_session(0).unwrap();
    editor.update(late, markdown_patch("late")).unwrap();

    let response = backend.upsert_objects(ticket.request());
    let report = editor.complete_save(ticket, response).unwrap();

    let page_id = report.root_id;
    let first_id = report.id_map[&first];
    let untouched_id = report.id_map[&untouched];
    let page = editor.session(page_id).unwrap();
    assert_eq!(page.attributes.name, "renamed while saving");
    let links: Vec<i64> = page.composite.subobjects.keys().copied().collect();
    assert!(links.contains(&first_id));
    assert!(links.contains(&untouched_id));
    assert!(links.contains(&late));
    assert_eq!(
        editor.session(first_id).unwrap().attributes.name,
        "first, edited while saving"
    );
    assert!(editor.session(late).is_some());
    assert!(editor.is_modified(page_id));
    assert!(editor.is_modified(first_id));
    assert!(!editor.is_modified(untouched_id));
    assert_eq!(
        editor.objects().get(page_id).unwrap().attributes.name,
        "page"
    );

    let second = editor.save(page_id).unwrap();
    let late_id = second.id_map[&late];
    assert!(!editor.is_modified(page_id));
    assert!(!editor.is_modified(first_id));
    let stored = editor.objects().get(page_id).unwrap();
    assert_eq!(stored.attributes.name, "renamed while saving");
    assert_eq!(stored.subobjects().len(), 3);
    assert!(stored
        .subobjects()
        .iter()
        .any(|record| record.child_id == late_id));
}

#[test]
fn unlinking_new_child_keeps_it_in_other_composites() {
    let conn = open_db_in_memory().unwrap();
    let backend = RecordingBackend::new(&conn);
    let (other_page, _) = seed_page(&backend, 1);
    let mut editor = ObjectEditor::new(&backend);
    editor.load_objects(&[other_page]).unwrap();
    editor.open_session(other_page).unwrap();

    editor.open_session(0).unwrap();
    editor.update(0, composite_patch("page")).unwrap();
    let shared = editor.create_new_subobject_session(0).unwrap();
    editor.update(shared, markdown_patch("shared")).unwrap();
    let kept = editor.create_new_subobject_session(0).unwrap();
    editor.update(kept, markdown_patch("kept")).unwrap();
    assert_eq!(
        editor.attach_existing_subobject(other_page, shared).unwrap(),
        AttachOutcome::Attached
    );
    editor
        .update_subobject(
            0,
            shared,
            SubobjectPatch {
                delete_mode: Some(DeleteMode::SubobjectOnly),
                ..SubobjectPatch::default()
            },
        )
        .unwrap();

    let report = editor.save(0).unwrap();

    let request = backend.last_upsert();
    assert!(request.added.iter().all(|object| object.id != shared));
    assert!(!report.id_map.contains_key(&shared));
    let page = editor.session(report.root_id).unwrap();
    assert!(!page.composite.subobjects.contains_key(&shared));
    assert_eq!(editor.objects().get(report.root_id).unwrap().subobjects().len(), 1);
    assert!(editor.session(shared).is_some());
    assert!(editor
        .session(other_page)
        .unwrap()
        .composite
        .subobjects
        .contains_key(&shared));

    let other = editor.save(other_page).unwrap();
    let shared_id = other.id_map[&shared];
    assert!(editor
        .objects()
        .get(other_page)
        .unwrap()
        .subobjects()
        .iter()
        .any(|record| record.child_id == shared_id));
}
