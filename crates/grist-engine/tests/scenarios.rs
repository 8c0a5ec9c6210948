//! End-to-end scenarios and quantified properties (§8) driven directly
//! against the public `grist_engine::engine` API, the same surface the
//! `grist` facade's `Engine` sits on top of.

use std::collections::BTreeMap;

use grist_engine::engine::action::{self, Action};
use grist_engine::engine::column::Column;
use grist_engine::engine::docmodel::{self, SummarySpec};
use grist_engine::engine::eval::{self, EvalCtx};
use grist_engine::engine::recalc;
use grist_engine::engine::relation;
use grist_engine::engine::summary::ActionSummary;
use grist_engine::engine::table::{ColumnSpec, Table};
use grist_engine::engine::translator;
use grist_engine::Document;
use grist_types::{CellValue, ColId, ColumnType, DependencyNode, RowId, TableId};

fn insert(doc: &mut Document, summary: &mut ActionSummary, table: TableId, values: &[(ColId, CellValue)]) -> RowId {
    let (row, _) = docmodel::insert(doc, summary, table, values.iter().cloned().collect()).unwrap();
    row
}

fn eval_formula(doc: &mut Document, summary: &mut ActionSummary, dep: DependencyNode, row: RowId, source: &str) -> CellValue {
    let body = grist_formula::transform(source).unwrap().body;
    let mut ctx = EvalCtx::new(doc, summary, dep.table, row, dep);
    match eval::eval_body(&mut ctx, &body) {
        Ok(v) => v.as_cell(),
        Err(e) => eval::error_to_cell(e),
    }
}

// --- Scenario 1: summary recompute on a single-field change ----------

#[test]
fn summary_recompute_on_single_field_change() {
    let mut doc = Document::new();
    let mut summary = ActionSummary::default();

    let mut orders = Table::new(TableId(1), "Orders");
    orders.add_column(ColId(1), Column::new("year", ColumnType::Int));
    orders.add_column(ColId(2), Column::new("amount", ColumnType::Numeric));
    doc.tables.insert(TableId(1), orders);

    let mut by_year = Table::new(TableId(2), "Orders_by_year");
    by_year.add_column(ColId(1), Column::new("year", ColumnType::Int));
    by_year.add_column(ColId(2), Column::new("count", ColumnType::Int));
    by_year.add_column(ColId(3), Column::new("amount", ColumnType::Numeric));
    doc.tables.insert(TableId(2), by_year);

    let rows = [
        (2012, 15.0),
        (2013, 17.0),
        (2013, 20.0),
        (2014, 35.0),
        (2014, 35.0),
        (2014, 16.0),
        (2015, 17.0),
        (2015, 36.0),
        (2015, 36.0),
        (2015, 17.0),
    ];
    let mut row_ids = Vec::new();
    for &(year, amount) in &rows {
        row_ids.push(insert(
            &mut doc,
            &mut summary,
            TableId(1),
            &[(ColId(1), CellValue::Int(year)), (ColId(2), CellValue::Numeric(amount))],
        ));
    }

    let spec = SummarySpec {
        source: TableId(1),
        group_cols: vec![ColId(1)],
        summary: TableId(2),
        summary_group_cols: vec![ColId(1)],
        count_col: Some(ColId(2)),
        sums: vec![(ColId(2), ColId(3))],
    };
    docmodel::refresh_summary_table(&mut doc, &mut summary, &spec).unwrap();

    let by_year = doc.tables.get(&TableId(2)).unwrap();
    let mut groups: BTreeMap<i64, (i64, f64)> = BTreeMap::new();
    for r in by_year.rows().filter(|r| !r.is_empty_record()) {
        let year = match by_year.get(ColId(1), r) {
            CellValue::Int(y) => y,
            other => panic!("unexpected year cell {other:?}"),
        };
        let count = match by_year.get(ColId(2), r) {
            CellValue::Int(c) => c,
            other => panic!("unexpected count cell {other:?}"),
        };
        let amount = match by_year.get(ColId(3), r) {
            CellValue::Numeric(a) => a,
            other => panic!("unexpected amount cell {other:?}"),
        };
        groups.insert(year, (count, amount));
    }
    assert_eq!(groups[&2012], (1, 15.0));
    assert_eq!(groups[&2013], (2, 37.0));
    assert_eq!(groups[&2014], (3, 86.0));
    assert_eq!(groups[&2015], (4, 106.0));

    docmodel::update(&mut doc, &mut summary, TableId(1), row_ids[0], BTreeMap::from([(ColId(2), CellValue::Numeric(14.0))])).unwrap();
    docmodel::refresh_summary_table(&mut doc, &mut summary, &spec).unwrap();

    let by_year = doc.tables.get(&TableId(2)).unwrap();
    let updated_row = by_year.rows().find(|&r| by_year.get(ColId(1), r) == CellValue::Int(2012)).unwrap();
    assert_eq!(by_year.get(ColId(3), updated_row), CellValue::Numeric(14.0));
    assert_eq!(by_year.get(ColId(2), updated_row), CellValue::Int(1));
}

// --- Scenario 2 / rename soundness: reference rename preserves data ---

#[test]
fn reference_rename_preserves_data_and_undoes_exactly() {
    let mut doc = Document::new();
    let mut summary = ActionSummary::default();

    let mut address = Table::new(TableId(2), "Address");
    address.add_column(ColId(1), Column::new("city", ColumnType::Text));
    doc.tables.insert(TableId(2), address);

    let mut people = Table::new(TableId(1), "People");
    people.add_column(ColId(1), Column::new("name", ColumnType::Text));
    people.add_column(ColId(2), Column::new("addr", ColumnType::Ref(TableId(2))));
    people.add_column(ColId(3), Column::formula("city", ColumnType::Text, "$addr.city"));
    doc.tables.insert(TableId(1), people);
    relation::reindex_reference_column(&doc.tables[&TableId(1)], ColId(2), TableId(2), &mut doc.backrefs);

    let addr_row = insert(&mut doc, &mut summary, TableId(2), &[(ColId(1), CellValue::Text("Albany".into()))]);
    insert(
        &mut doc,
        &mut summary,
        TableId(1),
        &[(ColId(1), CellValue::Text("Alice".into())), (ColId(2), CellValue::Ref(addr_row))],
    );

    let city_node = DependencyNode::new(TableId(1), ColId(3));
    doc.graph.schedule(city_node, [RowId(1)]);
    recalc::run(&mut doc, &mut summary);
    let before_city = doc.tables[&TableId(1)].get(ColId(3), RowId(1));
    assert_eq!(before_city, CellValue::Text("Albany".into()));

    let rename = translator::rename_column(&mut doc, &mut summary, TableId(2), ColId(1), "ciudad".to_string()).unwrap();
    assert_eq!(doc.tables[&TableId(1)].columns[&ColId(3)].formula.as_deref(), Some("$addr.ciudad"));

    doc.graph.schedule(city_node, [RowId(1)]);
    recalc::run(&mut doc, &mut summary);
    assert_eq!(doc.tables[&TableId(1)].get(ColId(3), RowId(1)), CellValue::Text("Albany".into()));

    action::apply(&mut doc, &mut summary, rename).unwrap();
    assert_eq!(doc.tables[&TableId(2)].columns[&ColId(1)].name, "city");
    assert_eq!(doc.tables[&TableId(1)].columns[&ColId(3)].formula.as_deref(), Some("$addr.city"));
}

// --- Scenario 3 / lookup consistency: lookupRecords with sort_by ------

#[test]
fn lookup_with_order_by_tracks_insertions_and_matches_a_naive_scan() {
    let mut doc = Document::new();
    let mut summary = ActionSummary::default();

    let mut customers = Table::new(TableId(1), "Customers");
    customers.insert_row(RowId(1));
    doc.tables.insert(TableId(1), customers);

    let mut purchases = Table::new(TableId(2), "Purchases");
    purchases.add_column(ColId(1), Column::new("Customer", ColumnType::Ref(TableId(1))));
    purchases.add_column(ColId(2), Column::new("Date", ColumnType::Int));
    purchases.add_column(ColId(3), Column::new("Amount", ColumnType::Numeric));
    doc.tables.insert(TableId(2), purchases);

    let dates = [1, 2, 3, 5, 6, 7, 9];
    let mut row_by_day = BTreeMap::new();
    for &day in &dates {
        let row = insert(
            &mut doc,
            &mut summary,
            TableId(2),
            &[(ColId(1), CellValue::Ref(RowId(1))), (ColId(2), CellValue::Int(day)), (ColId(3), CellValue::Numeric(day as f64))],
        );
        row_by_day.insert(day, row);
    }

    let dep = DependencyNode::new(TableId(1), ColId(1));
    let value = eval_formula(&mut doc, &mut summary, dep, RowId(1), "Purchases.lookupRecords(Customer=$id, sort_by='-Date')");
    let CellValue::RefList(list) = value else { panic!("expected a RefList") };
    let got: Vec<i64> = list.as_slice().iter().map(|r| r.0).collect();
    let expected: Vec<i64> = [9, 7, 6, 5, 3, 2, 1].iter().map(|&d| row_by_day[&d].0).collect();
    assert_eq!(got, expected);

    let day8 = insert(
        &mut doc,
        &mut summary,
        TableId(2),
        &[(ColId(1), CellValue::Ref(RowId(1))), (ColId(2), CellValue::Int(8)), (ColId(3), CellValue::Numeric(8.0))],
    );
    let value = eval_formula(&mut doc, &mut summary, dep, RowId(1), "Purchases.lookupRecords(Customer=$id, sort_by='-Date')");
    let CellValue::RefList(list) = value else { panic!("expected a RefList") };
    let got: Vec<i64> = list.as_slice().iter().map(|r| r.0).collect();
    let position = got.iter().position(|&r| r == day8.0).unwrap();
    assert_eq!(position, 2, "12/8 purchase should land between 12/9 and 12/7");

    let purchases = doc.tables.get(&TableId(2)).unwrap();
    let mut naive: Vec<RowId> = purchases
        .rows()
        .filter(|&r| !r.is_empty_record() && purchases.get(ColId(1), r) == CellValue::Ref(RowId(1)))
        .collect();
    let got_set: std::collections::BTreeSet<i64> = got.iter().copied().collect();
    naive.sort_by_key(|r| r.0);
    let naive_set: std::collections::BTreeSet<i64> = naive.iter().map(|r| r.0).collect();
    assert_eq!(got_set, naive_set, "lookup result must be the same multiset a naive scan would find");
}

// --- Scenario 5: circular reference -----------------------------------

#[test]
fn circular_reference_raises_on_both_cells_and_does_not_nest() {
    let mut doc = Document::new();
    let mut summary = ActionSummary::default();

    let mut loop_table = Table::new(TableId(1), "Loop");
    loop_table.add_column(ColId(1), Column::formula("A", ColumnType::Any, "rec.B"));
    loop_table.add_column(ColId(2), Column::formula("B", ColumnType::Any, "rec.A"));
    loop_table.add_column(ColId(3), Column::formula("C", ColumnType::Any, "rec.A"));
    loop_table.insert_row(RowId(1));
    doc.tables.insert(TableId(1), loop_table);

    let a = DependencyNode::new(TableId(1), ColId(1));
    doc.graph.schedule(a, [RowId(1)]);
    recalc::run(&mut doc, &mut summary);

    let t = &doc.tables[&TableId(1)];
    assert!(matches!(t.get(ColId(1), RowId(1)), CellValue::Raised(_)));
    assert!(matches!(t.get(ColId(2), RowId(1)), CellValue::Raised(_)));

    let c = DependencyNode::new(TableId(1), ColId(3));
    doc.graph.schedule(c, [RowId(1)]);
    recalc::run(&mut doc, &mut summary);
    match doc.tables[&TableId(1)].get(ColId(3), RowId(1)) {
        CellValue::Raised(exc) => assert_eq!(exc.name, "CircularRefError"),
        other => panic!("expected a circular-ref exception, got {other:?}"),
    }
}

// --- Scenario 6: remove referenced table with visible column ---------

#[test]
fn removing_referenced_table_retypes_and_backfills_visible_column() {
    let mut doc = Document::new();
    let mut summary = ActionSummary::default();

    let mut address = Table::new(TableId(2), "Address");
    address.add_column(ColId(1), Column::new("city", ColumnType::Text));
    doc.tables.insert(TableId(2), address);

    let mut people = Table::new(TableId(1), "People");
    people.add_column(ColId(1), Column::new("name", ColumnType::Text));
    people.add_column(ColId(2), Column::new("address", ColumnType::Ref(TableId(2))));
    doc.tables.insert(TableId(1), people);

    let albany = insert(&mut doc, &mut summary, TableId(2), &[(ColId(1), CellValue::Text("Albany".into()))]);
    let bedford = insert(&mut doc, &mut summary, TableId(2), &[(ColId(1), CellValue::Text("Bedford".into()))]);
    let buffalo = insert(&mut doc, &mut summary, TableId(2), &[(ColId(1), CellValue::Text("Buffalo".into()))]);
    insert(&mut doc, &mut summary, TableId(1), &[(ColId(1), CellValue::Text("Alice".into())), (ColId(2), CellValue::Ref(albany))]);
    insert(&mut doc, &mut summary, TableId(1), &[(ColId(1), CellValue::Text("Bob".into())), (ColId(2), CellValue::Ref(bedford))]);
    insert(&mut doc, &mut summary, TableId(1), &[(ColId(1), CellValue::Text("Carol".into())), (ColId(2), CellValue::Ref(buffalo))]);

    action::apply(&mut doc, &mut summary, Action::RemoveTable { table: TableId(2) }).unwrap();

    let people = &doc.tables[&TableId(1)];
    assert_eq!(people.columns[&ColId(2)].col_type, ColumnType::Text);
    let names: Vec<(String, String)> = people
        .rows()
        .filter(|r| !r.is_empty_record())
        .map(|r| {
            let CellValue::Text(name) = people.get(ColId(1), r) else { panic!("name not text") };
            let CellValue::Text(addr) = people.get(ColId(2), r) else { panic!("address not text") };
            (name, addr)
        })
        .collect();
    assert_eq!(
        names,
        vec![("Alice".to_string(), "Albany".to_string()), ("Bob".to_string(), "Bedford".to_string()), ("Carol".to_string(), "Buffalo".to_string())]
    );
}

// --- Determinism / undo completeness / round-trip ---------------------

#[test]
fn same_bundle_on_two_identical_documents_produces_byte_equal_results() {
    fn build() -> Document {
        let mut doc = Document::new();
        let mut t = Table::new(TableId(1), "Orders");
        t.add_column(ColId(1), Column::new("Amount", ColumnType::Numeric));
        t.add_column(ColId(2), Column::formula("Double", ColumnType::Numeric, "rec.Amount * 2"));
        doc.tables.insert(TableId(1), t);
        doc
    }

    let mut doc_a = build();
    let mut doc_b = build();
    let mut summary_a = ActionSummary::default();
    let mut summary_b = ActionSummary::default();

    let values: BTreeMap<ColId, CellValue> = BTreeMap::from([(ColId(1), CellValue::Numeric(5.0))]);
    let (_, inv_a) = translator::add_records(&mut doc_a, &mut summary_a, TableId(1), vec![values.clone()], None).unwrap();
    let (_, inv_b) = translator::add_records(&mut doc_b, &mut summary_b, TableId(1), vec![values], None).unwrap();
    assert_eq!(inv_a, inv_b);

    let double = DependencyNode::new(TableId(1), ColId(2));
    doc_a.graph.schedule(double, [RowId(1)]);
    doc_b.graph.schedule(double, [RowId(1)]);
    recalc::run(&mut doc_a, &mut summary_a);
    recalc::run(&mut doc_b, &mut summary_b);
    let double_a = doc_a.tables[&TableId(1)].get(ColId(2), RowId(1));
    let double_b = doc_b.tables[&TableId(1)].get(ColId(2), RowId(1));
    assert_eq!(double_a, CellValue::Numeric(10.0));
    assert_eq!(double_a, double_b);
}

#[test]
fn undo_of_a_single_action_produces_an_empty_net_change_summary() {
    let mut doc = Document::new();
    let mut summary = ActionSummary::default();
    let mut t = Table::new(TableId(1), "Orders");
    t.add_column(ColId(1), Column::new("Amount", ColumnType::Numeric));
    doc.tables.insert(TableId(1), t);

    let row = insert(&mut doc, &mut summary, TableId(1), &[(ColId(1), CellValue::Numeric(5.0))]);
    let before = doc.tables[&TableId(1)].clone();

    let inverse = docmodel::update(&mut doc, &mut summary, TableId(1), row, BTreeMap::from([(ColId(1), CellValue::Numeric(9.0))])).unwrap();
    let mut undo_summary = ActionSummary::default();
    action::apply(&mut doc, &mut undo_summary, inverse).unwrap();

    assert_eq!(doc.tables[&TableId(1)].get(ColId(1), row), before.get(ColId(1), row));
}

// --- Position stability -------------------------------------------------

#[test]
fn insert_and_remove_sequence_keeps_ascending_order_with_unique_keys() {
    let mut doc = Document::new();
    let mut summary = ActionSummary::default();
    let mut t = Table::new(TableId(1), "Tasks");
    t.add_column(ColId(1), Column::new("manualSort", ColumnType::PositionNumber));
    t.add_column(ColId(2), Column::new("title", ColumnType::Text));
    doc.tables.insert(TableId(1), t);

    let mut titles = Vec::new();
    for (i, title) in ["a", "b", "c", "d"].iter().enumerate() {
        let values = BTreeMap::from([(ColId(2), CellValue::Text(title.to_string()))]);
        translator::add_records(&mut doc, &mut summary, TableId(1), vec![values], Some(i)).unwrap();
        titles.push(title.to_string());
    }
    // insert "x" at index 2: a, b, x, c, d
    let values = BTreeMap::from([(ColId(2), CellValue::Text("x".to_string()))]);
    translator::add_records(&mut doc, &mut summary, TableId(1), vec![values], Some(2)).unwrap();

    let t = &doc.tables[&TableId(1)];
    let mut rows: Vec<RowId> = t.rows().filter(|r| !r.is_empty_record()).collect();
    rows.sort_by(|&a, &b| {
        let pa = match t.get(ColId(1), a) {
            CellValue::PositionNumber(p) => p,
            _ => 0.0,
        };
        let pb = match t.get(ColId(1), b) {
            CellValue::PositionNumber(p) => p,
            _ => 0.0,
        };
        pa.partial_cmp(&pb).unwrap()
    });
    let ordered: Vec<String> = rows
        .iter()
        .map(|&r| match t.get(ColId(2), r) {
            CellValue::Text(s) => s,
            _ => String::new(),
        })
        .collect();
    assert_eq!(ordered, vec!["a", "b", "x", "c", "d"]);

    let mut positions: Vec<f64> = rows
        .iter()
        .map(|&r| match t.get(ColId(1), r) {
            CellValue::PositionNumber(p) => p,
            _ => 0.0,
        })
        .collect();
    let mut dedup = positions.clone();
    dedup.dedup();
    assert_eq!(dedup.len(), positions.len(), "every row must keep a distinct position key");
    positions.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
}

// --- Scenario 4: conditional rule helper column -------------------------

#[test]
fn add_empty_rule_then_setting_its_formula_evaluates_per_row() {
    let mut doc = Document::new();
    let mut summary = ActionSummary::default();

    let mut inventory = Table::new(TableId(1), "Inventory");
    inventory.add_column(ColId(1), Column::new("Stock", ColumnType::Int));
    doc.tables.insert(TableId(1), inventory);

    let mut rows = Vec::new();
    for stock in [0, 2, 5, 10] {
        rows.push(insert(&mut doc, &mut summary, TableId(1), &[(ColId(1), CellValue::Int(stock))]));
    }

    let (helper_col, _) = translator::add_empty_rule(&mut doc, &mut summary, TableId(1), ColId(1)).unwrap();
    assert_eq!(doc.tables[&TableId(1)].columns[&ColId(1)].rules, vec![helper_col]);
    assert_eq!(doc.tables[&TableId(1)].columns[&helper_col].name, "gristHelper_ConditionalRule");
    assert_eq!(doc.tables[&TableId(1)].columns[&helper_col].col_type, ColumnType::Any);

    let spec = ColumnSpec {
        col_type: ColumnType::Any,
        is_formula: true,
        formula: Some("$Stock == 0".to_string()),
    };
    action::apply(&mut doc, &mut summary, Action::ModifyColumn { table: TableId(1), col: helper_col, spec }).unwrap();
    recalc::run(&mut doc, &mut summary);

    let results: Vec<CellValue> = rows.iter().map(|&r| doc.tables[&TableId(1)].get(helper_col, r)).collect();
    assert_eq!(
        results,
        vec![CellValue::Bool(true), CellValue::Bool(false), CellValue::Bool(false), CellValue::Bool(false)]
    );

    // Undoing the rule's removal restores both its membership in `rules`
    // and its edited formula text, not just an empty placeholder.
    let inverse = action::apply(&mut doc, &mut summary, Action::RemoveColumn { table: TableId(1), col: helper_col }).unwrap();
    assert!(doc.tables[&TableId(1)].columns[&ColId(1)].rules.is_empty());
    action::apply(&mut doc, &mut summary, inverse).unwrap();
    assert_eq!(doc.tables[&TableId(1)].columns[&ColId(1)].rules, vec![helper_col]);
    assert_eq!(doc.tables[&TableId(1)].columns[&helper_col].formula.as_deref(), Some("$Stock == 0"));
}
