use periodic_filing_reconciler::*;
use proptest::prelude::*;
use std::collections::HashMap;
use std::path::Path;

/// One monthly return, described by the handful of figures the scenarios vary.
#[derive(Clone)]
struct Month {
    financial_year: &'static str,
    month: &'static str,
    filed: &'static str,
    taxable: f64,
    exempt: f64,
    igst: f64,
    reverse_charge_igst: f64,
    import_igst: f64,
    cash_igst: f64,
    interest_paid_igst: f64,
}

impl Month {
    fn new(financial_year: &'static str, month: &'static str, filed: &'static str) -> Self {
        Self {
            financial_year,
            month,
            filed,
            taxable: 1_000_000.0,
            exempt: 0.0,
            igst: 180_000.0,
            reverse_charge_igst: 0.0,
            import_igst: 0.0,
            cash_igst: 0.0,
            interest_paid_igst: 0.0,
        }
    }
}

fn amount(value: f64) -> String {
    format!("{:.2}", value)
}

fn row(cells: &[&str]) -> Vec<String> {
    cells.iter().map(|c| c.to_string()).collect()
}

fn grid(page: u32, rows: Vec<Vec<String>>) -> RawGrid {
    RawGrid::from_rows(page, rows)
}

/// Raw page grids of a legacy-layout return, as the locator would produce them.
fn legacy_grids(m: &Month) -> Vec<RawGrid> {
    let zero = amount(0.0);
    let rc_claimed = m.reverse_charge_igst * 0.8;

    let period = grid(
        1,
        vec![row(&["Year", m.financial_year]), row(&["Period", m.month])],
    );
    let taxpayer = grid(
        1,
        vec![
            row(&["GSTIN of the supplier", "27AAAAA0000A1Z5"]),
            row(&["Legal name of the registered person", "Acme Traders Private Limited"]),
            row(&["Trade name, if any", "Acme Traders"]),
            row(&["ARN", "AA270422000001"]),
            row(&["Date of ARN", m.filed]),
        ],
    );
    let liability = grid(
        1,
        vec![
            row(&["Nature of Supplies", "Total Taxable value", "Integrated Tax", "Central Tax", "State/UT Tax", "Cess"]),
            row(&["(a) Outward taxable supplies", &amount(m.taxable), &amount(m.igst), &zero, &zero, &zero]),
            row(&["(b) Outward taxable supplies (zero rated)", &zero, &zero, &zero, &zero, &zero]),
            row(&["(c) Other outward supplies (nil rated, exempted)", &amount(m.exempt), &zero, &zero, &zero, &zero]),
            row(&["(d) Inward supplies (liable to reverse charge)", "50000.00", &amount(m.reverse_charge_igst), &zero, &zero, &zero]),
            row(&["(e) Non-GST outward supplies", &zero, &zero, &zero, &zero, &zero]),
        ],
    );
    let inter_state = grid(
        1,
        vec![
            row(&["Place of Supply", "Total Taxable value", "Amount of Integrated Tax"]),
            row(&["Supplies made to Unregistered Persons", &zero, &zero]),
        ],
    );
    let credit_head = grid(
        2,
        vec![
            row(&["Details", "Integrated Tax", "Central Tax", "State/UT Tax", "Cess"]),
            row(&["A. ITC Available (whether in full or part)", "", "", "", ""]),
            row(&["(1) Import of goods", &amount(m.import_igst), &zero, &zero, &zero]),
            row(&["(2) Import of services", &zero, &zero, &zero, &zero]),
        ],
    );
    // Continues on the next page; its first row is detected as a header.
    let credit_tail = grid(
        2,
        vec![
            row(&["(3) Inward supplies liable to reverse charge", &amount(rc_claimed), &zero, &zero, &zero]),
            row(&["(4) Inward supplies from ISD", &zero, &zero, &zero, &zero]),
            row(&["(5) All other ITC", &zero, &zero, &zero, &zero]),
            row(&["B. ITC Reversed", "", "", "", ""]),
            row(&["(1) As per rules 42 & 43", &zero, &zero, &zero, &zero]),
            row(&["(2) Others", &zero, &zero, &zero, &zero]),
            row(&["C. Net ITC Available (A) - (B)", &amount(m.import_igst + rc_claimed), &zero, &zero, &zero]),
            row(&["D. Ineligible ITC", "", "", "", ""]),
        ],
    );
    let exempt_inward = grid(
        2,
        vec![
            row(&["Nature of supplies", "Inter-State supplies", "Intra-State supplies"]),
            row(&["From a supplier under composition scheme, Exempt and Nil rated supply", &zero, &zero]),
        ],
    );
    let interest_fee = grid(
        2,
        vec![
            row(&["Details", "Integrated Tax", "Central Tax", "State/UT Tax", "Cess"]),
            row(&["Interest", &amount(m.interest_paid_igst), &zero, &zero, &zero]),
        ],
    );

    let mut payment_rows = vec![
        row(&[
            "Description",
            "Total tax payable",
            "Tax paid through ITC",
            "",
            "",
            "",
            "Tax paid in cash",
            "Interest paid in cash",
            "Late fee paid in cash",
        ]),
        row(&["", "", "Integrated Tax", "Central Tax", "State/UT Tax", "Cess", "", "", ""]),
        row(&["(A) Other than reverse charge", "", "", "", "", "", "", "", ""]),
    ];
    let heads = ["Integrated Tax", "Central Tax", "State/UT Tax", "Cess"];
    for (idx, head) in heads.iter().enumerate() {
        let (payable, cash, interest) = if idx == 0 {
            (m.igst, m.cash_igst, m.interest_paid_igst)
        } else {
            (0.0, 0.0, 0.0)
        };
        let through_itc = (payable - cash).max(0.0);
        payment_rows.push(row(&[
            head,
            &amount(payable),
            &amount(through_itc),
            &zero,
            &zero,
            &zero,
            &amount(cash),
            &amount(interest),
            &zero,
        ]));
    }
    payment_rows.push(row(&["(B) Reverse charge", "", "", "", "", "", "", "", ""]));
    for (idx, head) in heads.iter().enumerate() {
        let payable = if idx == 0 { m.reverse_charge_igst } else { 0.0 };
        payment_rows.push(row(&[head, &amount(payable), &zero, &zero, &zero, &zero, &amount(payable), &zero, &zero]));
    }
    let payment = grid(3, payment_rows);

    vec![
        period,
        taxpayer,
        liability,
        inter_state,
        credit_head,
        credit_tail,
        exempt_inward,
        interest_fee,
        payment,
    ]
}

fn document(source: &str, m: &Month) -> FilingDocument {
    extract_document(source, &legacy_grids(m))
}

fn april_and_may() -> (Month, Month) {
    let april = Month {
        taxable: 1_000_000.0,
        exempt: 100_000.0,
        igst: 180_000.0,
        reverse_charge_igst: 5_000.0,
        import_igst: 20_000.0,
        ..Month::new("2022-23", "April", "20/05/2022")
    };
    // Due 20 June; filed ten days late with tax paid in cash.
    let may = Month {
        taxable: 2_000_000.0,
        igst: 360_000.0,
        reverse_charge_igst: 5_000.0,
        import_igst: 30_000.0,
        cash_igst: 36_500.0,
        ..Month::new("2022-23", "May", "30/06/2022")
    };
    (april, may)
}

fn report_for(documents: Vec<FilingDocument>) -> (MergedReturn, ReconciliationReport) {
    let mut set = FilerPeriodSet::new("27AAAAA0000A1Z5");
    for d in documents {
        set.push(d);
    }
    let merged = merge_period_set(&set).unwrap();
    let report = compute_report(&ReconcilerConfig::default(), &set.filer, &merged, &set.interest_matrices());
    (merged, report)
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 0.01,
        "expected {}, got {}",
        expected,
        actual
    );
}

fn igst(points: &ResultPoints, key: ResultPointKey) -> f64 {
    points
        .per_head(key)
        .unwrap_or_else(|| panic!("{} unavailable", key))
        .get(TaxHead::Igst)
}

struct FixedLocator {
    grids: HashMap<String, Vec<RawGrid>>,
}

impl GridLocator for FixedLocator {
    fn locate(&self, path: &Path) -> Result<Vec<RawGrid>> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.grids.get(&name).cloned().ok_or(ReconcileError::PdfError {
            document: name,
            details: "not a PDF".to_string(),
        })
    }
}

#[test]
fn test_extraction_of_legacy_return() {
    let (april, _) = april_and_may();
    let doc = document("april.pdf", &april);

    assert_eq!(doc.layout, LayoutVersion::Legacy);
    assert_eq!(doc.raw_grid_count, 9);

    let credit = doc.table(TableKey::EligibleCredit).unwrap();
    // Header plus both fragments: A, A(1)..A(5), B, B(1), B(2), C, D.
    assert_eq!(credit.height(), 11);
    assert_eq!(credit.cell(3, 0), Some("(3) Inward supplies liable to reverse charge"));
    assert_eq!(credit.cell(9, 1), Some("24000.00"));

    let payment = doc.table(TableKey::TaxPayment).unwrap();
    assert_eq!(payment.header.len(), 9);
    assert_eq!(payment.height(), 10);
    assert_eq!(payment.cell(0, 0), Some("(A) Other than reverse charge"));
    assert_eq!(payment.cell(6, 1), Some("5000.00"));

    let period = doc.period.as_ref().unwrap();
    assert_eq!(period.financial_year, "2022-23");
    assert_eq!(period.return_month, "April");
    assert_eq!(period.filing_date, chrono::NaiveDate::from_ymd_opt(2022, 5, 20).unwrap());
}

#[test]
fn test_two_month_reconciliation() {
    let (april, may) = april_and_may();
    let (merged, report) = report_for(vec![document("apr.pdf", &april), document("may.pdf", &may)]);
    let points = &report.result_points;

    assert_eq!(merged.document_count, 2);
    assert_eq!(merged.tables[&TableKey::OutwardLiability].cell(0, 1), Some("3000000"));
    assert_eq!(report.identity.gstin, "27AAAAA0000A1Z5");
    assert_eq!(report.identity.financial_year, "2022-23");

    // Turnover figures from the merged 3.1 table.
    assert_close(points.amount(ResultPointKey::ExemptAndNonGstValue).unwrap(), 100_000.0);
    assert_close(points.amount(ResultPointKey::TaxableTurnoverAce).unwrap(), 3_100_000.0);
    assert_close(points.amount(ResultPointKey::AdjustedTurnover).unwrap(), 3_000_000.0);
    assert_close(points.amount(ResultPointKey::ReverseChargeTaxTotal).unwrap(), 10_000.0);
    assert_close(points.amount(ResultPointKey::AnnualReturnLateFee).unwrap(), 0.0);

    // Credit.
    assert_close(igst(points, ResultPointKey::ImportOfGoodsCredit), 50_000.0);
    assert_close(points.amount(ResultPointKey::NetCreditAvailable).unwrap(), 58_000.0);
    assert_close(igst(points, ResultPointKey::ReverseChargeItcGap), 2_000.0);
    assert_close(igst(points, ResultPointKey::ReverseChargePaymentGap), 0.0);
    assert_close(igst(points, ResultPointKey::EstimatedItcReversal), 50_000.0 * 100_000.0 / 3_100_000.0);
    assert_close(igst(points, ResultPointKey::TotalTaxPayable), 550_000.0);

    // April was filed before its extended due date of 24 May.
    assert_eq!(report.late_fee_records[0].due_date, chrono::NaiveDate::from_ymd_opt(2022, 5, 24).unwrap());
    assert_eq!(report.late_fee_records[0].days_late, 0);
    assert_eq!(report.late_fee_records[1].days_late, 10);
    assert_close(points.amount(ResultPointKey::LateFeeTotal).unwrap(), 1_000.0);

    // 36,500 plus 5,000 reverse charge in cash, ten days late at 18%.
    let expected = 41_500.0 * 10.0 / 365.0 * 0.18;
    assert_close(igst(points, ResultPointKey::InterestDue), expected);
    assert_close(report.interest_records[1].calculated_interest, expected);
    assert_close(report.interest_records[0].calculated_interest, 0.0);

    assert_close(igst(points, ResultPointKey::IneligibleCreditLateFiling), 0.0);
    assert_close(igst(points, ResultPointKey::CashLiabilityShortfall), 0.0);
    assert!(report.skipped.is_empty());
    assert_eq!(report.credit_blocks.len(), 2);
    assert!(report.credit_blocks.iter().all(|b| !b.ineligible));
}

#[test]
fn test_late_filing_after_credit_cutoff() {
    // FY 2021-22 credit lapses after 30 November 2022.
    let march = Month {
        import_igst: 10_000.0,
        reverse_charge_igst: 5_000.0,
        cash_igst: 3_650.0,
        ..Month::new("2021-22", "March", "05/12/2022")
    };
    let (_, report) = report_for(vec![document("mar.pdf", &march)]);
    let points = &report.result_points;

    assert!(report.credit_blocks[0].ineligible);
    assert_eq!(report.credit_blocks[0].rows.len(), 5);
    // A(1) 10,000 plus A(3) 4,000.
    assert_close(igst(points, ResultPointKey::IneligibleCreditLateFiling), 14_000.0);

    // Due 20 April 2022: 229 days late, fee capped.
    assert_eq!(report.late_fee_records[0].days_late, 229);
    assert_close(report.late_fee_records[0].calculated_fee, 22_900.0);
    assert_close(points.amount(ResultPointKey::LateFeeTotal).unwrap(), 5_000.0);

    // Reverse-charge cash of 5,000 also bears interest.
    let expected = (3_650.0 + 5_000.0) * 229.0 / 365.0 * 0.18;
    assert_close(igst(points, ResultPointKey::InterestDue), expected);
}

#[test]
fn test_interest_already_paid_is_not_due() {
    let mut month = Month::new("2022-23", "June", "30/07/2022");
    month.cash_igst = 36_500.0;
    month.interest_paid_igst = 1_000.0;
    let (_, report) = report_for(vec![document("jun.pdf", &month)]);

    assert_close(igst(&report.result_points, ResultPointKey::InterestDue), 0.0);
    // The record keeps the negative balance.
    assert_close(report.interest_records[0].interest_due, 180.0 - 1_000.0);
}

#[test]
fn test_cash_shortfall_above_threshold() {
    let large = Month {
        taxable: 6_000_000.0,
        igst: 1_080_000.0,
        cash_igst: 5_000.0,
        ..Month::new("2022-23", "July", "20/08/2022")
    };
    let small = Month::new("2022-23", "August", "20/09/2022");
    let (_, report) = report_for(vec![document("jul.pdf", &large), document("aug.pdf", &small)]);

    // 1% of 1,080,000 is 10,800; 5,000 was paid.
    assert_close(igst(&report.result_points, ResultPointKey::CashLiabilityShortfall), 5_800.0);
}

#[test]
fn test_annual_return_late_fee_above_turnover_threshold() {
    let month = Month {
        taxable: 25_000_000.0,
        igst: 4_500_000.0,
        cash_igst: 250_000.0,
        ..Month::new("2022-23", "October", "20/11/2022")
    };
    let (_, report) = report_for(vec![document("oct.pdf", &month)]);
    assert_close(
        report.result_points.amount(ResultPointKey::AnnualReturnLateFee).unwrap(),
        25_000_000.0 * 0.0025,
    );
}

#[test]
fn test_unreadable_filing_date_degrades_gracefully() {
    let (april, may) = april_and_may();
    let broken = document("broken.pdf", &Month::new("2022-23", "June", "not a date"));
    assert!(broken.period.is_none());
    let (_, report) = report_for(vec![document("apr.pdf", &april), broken, document("may.pdf", &may)]);

    // The broken return still counts toward the merged tables.
    assert_eq!(report.document_count, 3);
    assert_close(report.result_points.amount(ResultPointKey::LateFeeTotal).unwrap(), 1_000.0);
    assert!(report.skipped.iter().any(|s| s.source == "broken.pdf" && s.metric == ResultPointKey::LateFeeTotal));
    assert_eq!(report.late_fee_records.len(), 2);
}

#[test]
fn test_dash_placeholders_in_credit_table() {
    let (april, may) = april_and_may();
    let mut documents = vec![document("apr.pdf", &april), document("may.pdf", &may)];
    for doc in &mut documents {
        let credit = doc.tables.get_mut(&TableKey::EligibleCredit).unwrap();
        // "(1) Import of goods" with no central or state tax printed.
        credit.rows[1][2] = "-".to_string();
        credit.rows[1][3] = "-".to_string();
    }
    let (merged, report) = report_for(documents);

    let credit = &merged.tables[&TableKey::EligibleCredit];
    assert_eq!(credit.rows[1], row(&["(1) Import of goods", "50000", "0", "0", "0"]));

    let heads = report.result_points.per_head(ResultPointKey::ImportOfGoodsCredit).unwrap();
    assert_close(heads.igst, 50_000.0);
    assert_close(heads.cgst, 0.0);
    assert_close(heads.sgst, 0.0);
    assert!(report.result_points.get(ResultPointKey::EstimatedItcReversal).unwrap().is_available());
}

#[test]
fn test_missing_table_marks_only_dependent_points_unavailable() {
    let (april, _) = april_and_may();
    let mut doc = document("apr.pdf", &april);
    doc.tables.remove(&TableKey::TaxPayment);
    let mut other = document("may.pdf", &april);
    other.tables.remove(&TableKey::TaxPayment);

    let (_, report) = report_for(vec![doc, other]);
    let points = &report.result_points;

    assert!(!points.get(ResultPointKey::TotalTaxPayable).unwrap().is_available());
    assert!(!points.get(ResultPointKey::LateFeePaidInCash).unwrap().is_available());
    assert!(points.get(ResultPointKey::ImportOfGoodsCredit).unwrap().is_available());
    assert!(points.get(ResultPointKey::LateFeeTotal).unwrap().is_available());

    let flat = points.to_flat_map();
    assert_eq!(flat["total_tax_payable_igst"], None);
    assert_eq!(flat["import_of_goods_credit_igst"], Some(40_000.0));
}

#[test]
fn test_run_filer_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ReconcilerConfig::default();
    config.input_root = dir.path().join("uploaded_files");
    config.output_root = dir.path().join("reports");

    let filer = "27AAAAA0000A1Z5";
    let returns = config.input_root.join(filer).join("GSTR-3B");
    std::fs::create_dir_all(&returns).unwrap();
    for name in ["2022-04.pdf", "2022-05.pdf", "scan.pdf"] {
        std::fs::write(returns.join(name), b"%PDF-1.4").unwrap();
    }

    let (april, may) = april_and_may();
    let locator = FixedLocator {
        grids: HashMap::from([
            ("2022-04.pdf".to_string(), legacy_grids(&april)),
            ("2022-05.pdf".to_string(), legacy_grids(&may)),
        ]),
    };
    let reconciler = Reconciler::with_locator(config, locator).unwrap();
    let outcome = reconciler.run_filer(filer).unwrap();

    assert_eq!(outcome.unreadable.len(), 1);
    assert_eq!(outcome.report.document_count, 2);
    assert_eq!(outcome.artifact, dir.path().join("reports").join(filer).join("GSTR-3B_merged.xlsx"));
    assert!(outcome.artifact.exists());

    let loaded = load_merged_return(&outcome.artifact).unwrap();
    assert_eq!(loaded.layout, LayoutVersion::Legacy);
    assert_eq!(loaded.document_count, 2);
    assert_eq!(loaded.tables, outcome.merged.tables);

    // Merged-return points come out the same from the reloaded workbook.
    let reloaded = compute_report(reconciler.config(), filer, &loaded, &[]);
    for key in [
        ResultPointKey::EstimatedItcReversal,
        ResultPointKey::ReverseChargeItcGap,
        ResultPointKey::TotalTaxPayable,
        ResultPointKey::NetCreditAvailable,
    ] {
        assert_eq!(reloaded.result_points.get(key), outcome.report.result_points.get(key));
    }

    let json_path = outcome.result_points_file.unwrap();
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(json_path).unwrap()).unwrap();
    assert_eq!(json["result_points"]["late_fee_total"]["value"], 1000.0);
}

#[test]
fn test_concurrent_runs_for_the_same_filer() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ReconcilerConfig::default();
    config.output_root = dir.path().to_path_buf();
    config.write_result_points = false;

    let (april, may) = april_and_may();
    let reconciler = Reconciler::new(config).unwrap();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let docs = vec![document("apr.pdf", &april), document("may.pdf", &may)];
                reconciler.run_documents("filer", docs).unwrap();
            });
        }
    });

    let loaded = load_merged_return(&dir.path().join("filer").join("GSTR-3B_merged.xlsx")).unwrap();
    assert_eq!(loaded.tables[&TableKey::EligibleCredit].cell(1, 1), Some("50000"));
}

#[test]
fn test_single_return_missing_table_is_fatal() {
    let (april, _) = april_and_may();
    let mut grids = legacy_grids(&april);
    // Only eight grids: classified as the newest layout, which expects more.
    grids.truncate(8);
    let doc = extract_document("short.pdf", &grids);
    let mut set = FilerPeriodSet::new("x");
    set.push(doc);
    assert!(matches!(merge_period_set(&set), Err(ReconcileError::TableNotFound { .. })));
}

#[test]
fn test_schema_and_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reconciler.json");
    std::fs::write(&path, r#"{"late_fee_cap": 10000, "return_folder": "GSTR-3B"}"#).unwrap();

    let config = ReconcilerConfig::from_json_file(&path).unwrap();
    assert_eq!(config.late_fee_cap, 10_000.0);
    assert!(ReconcilerConfig::schema_as_json().unwrap().contains("grid_tolerance"));
}

/// Credit rows labelled by position, so tables of any height agree on labels.
fn credit_table(cells: &[String]) -> LogicalTable {
    let rows = cells
        .chunks(4)
        .enumerate()
        .map(|(idx, chunk)| {
            let mut cells = vec![format!("({}) row", idx + 1)];
            cells.extend(chunk.iter().cloned());
            cells.resize(5, String::new());
            cells
        })
        .collect();
    LogicalTable::new(
        TableKey::EligibleCredit,
        row(&["Details", "Integrated Tax", "Central Tax", "State/UT Tax", "Cess"]),
        rows,
    )
}

fn cell_text() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => (-10_000_000i64..10_000_000).prop_map(|cents| amount(cents as f64 / 100.0)),
        1 => Just(String::new()),
        1 => Just("-".to_string()),
        1 => Just("Nil".to_string()),
    ]
}

/// One to five rows of four value cells.
fn cells() -> impl Strategy<Value = Vec<String>> {
    (1usize..=5).prop_flat_map(|rows| prop::collection::vec(cell_text(), rows * 4))
}

fn assert_same_values(left: &LogicalTable, right: &LogicalTable) -> std::result::Result<(), TestCaseError> {
    prop_assert_eq!(left.height(), right.height());
    for (r, (x, y)) in left.rows.iter().zip(&right.rows).enumerate() {
        prop_assert_eq!(x.len(), y.len());
        prop_assert_eq!(&x[0], &y[0]);
        for c in 1..x.len() {
            let (lv, rv) = (left.number(r, c).unwrap(), right.number(r, c).unwrap());
            prop_assert!((lv - rv).abs() < 0.011, "cell ({}, {}): {} vs {}", r, c, lv, rv);
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_merge_is_order_independent(a in cells(), b in cells(), c in cells()) {
        let (ta, tb, tc) = (credit_table(&a), credit_table(&b), credit_table(&c));
        let abc = sum_tables(&[&ta, &tb, &tc]).unwrap();
        for order in [[&tb, &ta, &tc], [&tb, &tc, &ta], [&tc, &ta, &tb], [&tc, &tb, &ta]] {
            prop_assert_eq!(&sum_tables(&order).unwrap(), &abc);
        }

        let ab_c = sum_tables(&[&sum_tables(&[&ta, &tb]).unwrap(), &tc]).unwrap();
        let a_bc = sum_tables(&[&ta, &sum_tables(&[&tb, &tc]).unwrap()]).unwrap();
        assert_same_values(&ab_c, &abc)?;
        assert_same_values(&a_bc, &abc)?;
    }

    #[test]
    fn prop_merged_cell_is_the_sum(a in cells(), b in cells()) {
        let (ta, tb) = (credit_table(&a), credit_table(&b));
        let merged = sum_tables(&[&ta, &tb]).unwrap();
        prop_assert_eq!(merged.height(), ta.height().max(tb.height()));

        for r in 0..merged.height() {
            for c in 1..5 {
                let expected: f64 = [&ta, &tb]
                    .iter()
                    .filter_map(|t| t.cell(r, c))
                    .map(utils::parse_amount_or_zero)
                    .sum();
                // Every value cell is written as a number.
                let actual = merged.number(r, c).unwrap();
                prop_assert!((actual - expected).abs() < 0.011, "cell ({}, {}): {} vs {}", r, c, actual, expected);
            }
        }
    }

    #[test]
    fn prop_late_fee_is_monotone_and_capped(d1 in 0i64..2_000, extra in 0i64..2_000) {
        let (_, fee1) = late_fee_for(d1, 100.0, 5_000.0);
        let (_, fee2) = late_fee_for(d1 + extra, 100.0, 5_000.0);
        prop_assert!(fee1 <= fee2);
        prop_assert!(fee2 <= 5_000.0);
        prop_assert!(fee1 >= 0.0);
    }

    #[test]
    fn prop_due_date_follows_the_return_month(month in 1u32..=12, start in 2017i32..2030) {
        let fy = format!("{}-{:02}", start, (start + 1) % 100);
        let name = chrono::Month::try_from(month as u8).unwrap().name();
        let rules = DueDateRules::default();
        let due = rules.due_date(&fy, name, DuePurpose::LateFee).unwrap();

        let year = if month >= 4 { start } else { start + 1 };
        let period_start = chrono::NaiveDate::from_ymd_opt(year, month, 1).unwrap();
        prop_assert!(due > period_start);
        prop_assert!((due - period_start).num_days() <= 62);
    }
}
