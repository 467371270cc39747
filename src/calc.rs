use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::Serialize;
use std::collections::HashMap;

use crate::records::{AttendanceMark, Batch, FeePayment, MarkStatus, Student, Test};

/// Fee months are 30-day blocks counted from the joining date, not calendar
/// months. A payment buys 30 days of cover.
const DAYS_PER_FEE_MONTH: i64 = 30;
const GRACE_DAYS: i64 = 30;

pub const NO_DATA_LABEL: &str = "No Data";

pub fn round_one_decimal(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

pub fn round_percent(x: f64) -> i64 {
    x.round() as i64
}

/// Percentage of `total_marks` scored. Zero when the denominator is not
/// positive, never NaN.
pub fn score_percent(marks: f64, total_marks: f64) -> f64 {
    if total_marks > 0.0 {
        marks / total_marks * 100.0
    } else {
        0.0
    }
}

/// Plain mean, 0.0 on an empty slice.
pub fn average_for_set(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn fmt_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn default_subject(subject: &Option<String>) -> String {
    match subject {
        Some(s) if !s.is_empty() => s.clone(),
        _ => "General".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Fee ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeStatus {
    Paid,
    Current,
    Overdue,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeLedgerEntry {
    pub student_id: String,
    pub student_name: String,
    pub batch_name: Option<String>,
    pub phone: Option<String>,
    pub monthly_fee: f64,
    pub months_since_joining: i64,
    pub total_due_till_now: f64,
    pub total_paid: f64,
    pub remaining_due: f64,
    pub last_payment_date: Option<String>,
    pub days_since_last_paid: i64,
    pub days_overdue: i64,
    pub next_due_date: Option<String>,
    pub status: FeeStatus,
}

/// Ledger position of one student as of `now`. Total over all inputs: a
/// student with no payments and a zero fee still gets a well-formed entry.
pub fn fee_ledger_entry(
    student: &Student,
    payments: &[&FeePayment],
    now: NaiveDate,
) -> FeeLedgerEntry {
    let total_paid: f64 = payments.iter().map(|p| p.amount).sum();

    let days_since_join = (now - student.joining_date).num_days().max(0);
    let months_since_joining =
        ((days_since_join + DAYS_PER_FEE_MONTH - 1) / DAYS_PER_FEE_MONTH).max(1);
    let total_due_till_now = months_since_joining as f64 * student.monthly_fee;
    let remaining_due = (total_due_till_now - total_paid).max(0.0);

    let last_payment = payments.iter().map(|p| p.payment_date).max();
    let due_basis = last_payment.unwrap_or(student.joining_date);
    let days_since_last_paid = (now - due_basis).num_days().max(0);
    let days_overdue = (days_since_last_paid - GRACE_DAYS).max(0);

    let status = if remaining_due <= 0.0 {
        FeeStatus::Paid
    } else if days_overdue > 0 {
        FeeStatus::Overdue
    } else {
        FeeStatus::Current
    };

    FeeLedgerEntry {
        student_id: student.id.clone(),
        student_name: student.full_name.clone(),
        batch_name: student.batch_name.clone(),
        phone: student.phone.clone(),
        monthly_fee: student.monthly_fee,
        months_since_joining,
        total_due_till_now,
        total_paid,
        remaining_due,
        last_payment_date: last_payment.map(fmt_date),
        days_since_last_paid,
        days_overdue,
        next_due_date: last_payment.map(|d| fmt_date(d + Duration::days(DAYS_PER_FEE_MONTH))),
        status,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeSummary {
    pub total_students: usize,
    pub paid_count: usize,
    pub pending_count: usize,
    pub overdue_count: usize,
    pub total_collected: f64,
    pub total_pending: f64,
    pub month_collection: f64,
}

pub fn fee_summary(entries: &[FeeLedgerEntry], payments: &[FeePayment], now: NaiveDate) -> FeeSummary {
    let pending: Vec<&FeeLedgerEntry> =
        entries.iter().filter(|e| e.remaining_due > 0.0).collect();
    // An entry only counts as overdue here once it is a full grace period past
    // due, not merely past it.
    let overdue_count = pending.iter().filter(|e| e.days_overdue > GRACE_DAYS).count();
    FeeSummary {
        total_students: entries.len(),
        paid_count: entries.iter().filter(|e| e.status == FeeStatus::Paid).count(),
        pending_count: pending.len(),
        overdue_count,
        total_collected: payments.iter().map(|p| p.amount).sum(),
        total_pending: pending.iter().map(|e| e.remaining_due).sum(),
        month_collection: payments
            .iter()
            .filter(|p| {
                p.payment_date.year() == now.year() && p.payment_date.month() == now.month()
            })
            .map(|p| p.amount)
            .sum(),
    }
}

// ---------------------------------------------------------------------------
// Test score aggregation
// ---------------------------------------------------------------------------

/// Qualifying percentages per student across the given tests. A score
/// qualifies only when the student was present and a mark was entered.
pub fn qualifying_percents_by_student(tests: &[Test]) -> HashMap<String, Vec<f64>> {
    let mut by_student: HashMap<String, Vec<f64>> = HashMap::new();
    for test in tests {
        for score in &test.scores {
            if let Some(marks) = score.qualifying_marks() {
                by_student
                    .entry(score.student_id.clone())
                    .or_default()
                    .push(score_percent(marks, test.total_marks));
            }
        }
    }
    by_student
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStudent {
    pub rank: usize,
    pub student_id: String,
    pub name: String,
    pub avg_score: i64,
    pub tests_taken: usize,
    pub attendance: i64,
}

/// Rank students by average qualifying percentage, best first. Ties are broken
/// by ascending student id so the ordering is stable across runs; ranks are
/// positional and contiguous from 1. Students with no qualifying score are
/// left out entirely.
pub fn rank_students(
    tests: &[Test],
    names: &HashMap<String, String>,
    attendance: &[AttendanceMark],
) -> Vec<RankedStudent> {
    let mut rows: Vec<(String, i64, usize)> = qualifying_percents_by_student(tests)
        .into_iter()
        .map(|(id, percents)| {
            let avg = round_percent(average_for_set(&percents));
            (id, avg, percents.len())
        })
        .collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    rows.into_iter()
        .enumerate()
        .map(|(idx, (id, avg, taken))| {
            let mine: Vec<&AttendanceMark> =
                attendance.iter().filter(|m| m.student_id == id).collect();
            let present = mine.iter().filter(|m| m.status == MarkStatus::Present).count() as i64;
            RankedStudent {
                rank: idx + 1,
                name: names.get(&id).cloned().unwrap_or_default(),
                student_id: id,
                avg_score: avg,
                tests_taken: taken,
                attendance: attendance_percentage(present, mine.len() as i64),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct GradeBucket {
    pub name: String,
    pub value: usize,
}

fn grade_letter(avg: i64) -> &'static str {
    if avg >= 80 {
        "A"
    } else if avg >= 70 {
        "B"
    } else if avg >= 60 {
        "C"
    } else if avg >= 33 {
        "D"
    } else {
        "F"
    }
}

/// Distribution of integer averages over the A-F bands. Empty bands are
/// omitted; an all-empty input yields the single "No Data" placeholder bucket.
pub fn grade_distribution(averages: &[i64]) -> Vec<GradeBucket> {
    let order = ["A", "B", "C", "D", "F"];
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for &avg in averages {
        *counts.entry(grade_letter(avg)).or_insert(0) += 1;
    }
    let buckets: Vec<GradeBucket> = order
        .iter()
        .filter_map(|&g| {
            counts.get(g).map(|&count| GradeBucket {
                name: format!("Grade {g}"),
                value: count,
            })
        })
        .collect();
    if buckets.is_empty() {
        vec![GradeBucket {
            name: NO_DATA_LABEL.to_string(),
            value: 1,
        }]
    } else {
        buckets
    }
}

/// Average of the raw qualifying marks on one test, rounded to one decimal.
/// The only place in the engine that rounds to a decimal instead of an
/// integer percent.
pub fn test_raw_average(test: &Test) -> f64 {
    let marks: Vec<f64> = test.scores.iter().filter_map(|s| s.qualifying_marks()).collect();
    round_one_decimal(average_for_set(&marks))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDetailStats {
    pub avg_score: f64,
    pub avg_percent: i64,
    pub pass_count: usize,
    pub fail_count: usize,
    pub absent_count: usize,
    pub highest: f64,
    pub lowest: f64,
}

/// Per-test roll-up. The pass mark is a third of the total.
pub fn test_detail_stats(test: &Test) -> TestDetailStats {
    let pass_mark = test.total_marks / 3.0;
    let mut pass_count = 0;
    let mut fail_count = 0;
    let mut absent_count = 0;
    let mut marks: Vec<f64> = Vec::new();
    for score in &test.scores {
        match score.qualifying_marks() {
            Some(m) => {
                if m >= pass_mark {
                    pass_count += 1;
                } else {
                    fail_count += 1;
                }
                marks.push(m);
            }
            None => absent_count += 1,
        }
    }
    let avg = average_for_set(&marks);
    TestDetailStats {
        avg_score: round_one_decimal(avg),
        avg_percent: round_percent(score_percent(avg, test.total_marks)),
        pass_count,
        fail_count,
        absent_count,
        highest: marks.iter().cloned().fold(0.0, f64::max),
        lowest: if marks.is_empty() {
            0.0
        } else {
            marks.iter().cloned().fold(f64::INFINITY, f64::min)
        },
    }
}

// ---------------------------------------------------------------------------
// Attendance aggregation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceBand {
    Good,
    Moderate,
    Low,
}

impl AttendanceBand {
    pub fn from_percent(percent: i64) -> Self {
        if percent >= 80 {
            AttendanceBand::Good
        } else if percent >= 60 {
            AttendanceBand::Moderate
        } else {
            AttendanceBand::Low
        }
    }
}

pub fn attendance_percentage(present: i64, total: i64) -> i64 {
    if total > 0 {
        round_percent(present as f64 / total as f64 * 100.0)
    } else {
        0
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub present: i64,
    pub absent: i64,
    pub total: i64,
    pub percentage: i64,
    pub band: AttendanceBand,
}

pub fn attendance_summary(marks: &[&AttendanceMark]) -> AttendanceSummary {
    let present = marks.iter().filter(|m| m.status == MarkStatus::Present).count() as i64;
    let total = marks.len() as i64;
    let percentage = attendance_percentage(present, total);
    AttendanceSummary {
        present,
        absent: total - present,
        total,
        percentage,
        band: AttendanceBand::from_percent(percentage),
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let first = NaiveDate::from_ymd_opt(year, month, 1);
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    match (first, next) {
        (Some(a), Some(b)) => (b - a).num_days() as u32,
        _ => 0,
    }
}

/// Class days of the month that have already happened. Sundays are not class
/// days regardless of what was recorded on them.
pub fn class_days_elapsed(year: i32, month: u32, today: NaiveDate) -> i64 {
    let mut count = 0;
    for day in 1..=days_in_month(year, month) {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            if date <= today && date.weekday() != Weekday::Sun {
                count += 1;
            }
        }
    }
    count
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDay {
    pub date: String,
    pub present: i64,
    pub total: i64,
    pub percentage: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAttendanceRow {
    pub student_id: String,
    pub name: String,
    pub present: i64,
    pub total: i64,
    pub percentage: i64,
    pub band: AttendanceBand,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceMonthReport {
    pub class_days_elapsed: i64,
    pub calendar: Vec<CalendarDay>,
    pub students: Vec<StudentAttendanceRow>,
    pub summary: AttendanceSummary,
}

/// Month report for one batch. The calendar only carries days where marks were
/// actually recorded; a day nobody marked produces no datum rather than 0%.
/// The per-date denominator is the marks recorded that day, so unmarked
/// students are excluded, not treated as absent. The summary spans every mark
/// handed in, not just the month.
pub fn attendance_month_report(
    students: &[Student],
    marks: &[AttendanceMark],
    year: i32,
    month: u32,
    today: NaiveDate,
) -> AttendanceMonthReport {
    let mut calendar = Vec::new();
    for day in 1..=days_in_month(year, month) {
        let date = match NaiveDate::from_ymd_opt(year, month, day) {
            Some(d) => d,
            None => continue,
        };
        if date.weekday() == Weekday::Sun {
            continue;
        }
        let day_marks: Vec<&AttendanceMark> = marks.iter().filter(|m| m.date == date).collect();
        if day_marks.is_empty() {
            continue;
        }
        let present = day_marks.iter().filter(|m| m.status == MarkStatus::Present).count() as i64;
        let total = day_marks.len() as i64;
        calendar.push(CalendarDay {
            date: fmt_date(date),
            present,
            total,
            percentage: attendance_percentage(present, total),
        });
    }

    let month_marks: Vec<&AttendanceMark> = marks
        .iter()
        .filter(|m| m.date.year() == year && m.date.month() == month)
        .collect();
    let student_rows = students
        .iter()
        .map(|s| {
            let mine: Vec<&&AttendanceMark> =
                month_marks.iter().filter(|m| m.student_id == s.id).collect();
            let present = mine.iter().filter(|m| m.status == MarkStatus::Present).count() as i64;
            let total = mine.len() as i64;
            let percentage = attendance_percentage(present, total);
            StudentAttendanceRow {
                student_id: s.id.clone(),
                name: s.full_name.clone(),
                present,
                total,
                percentage,
                band: AttendanceBand::from_percent(percentage),
            }
        })
        .collect();

    let all: Vec<&AttendanceMark> = marks.iter().collect();
    AttendanceMonthReport {
        class_days_elapsed: class_days_elapsed(year, month, today),
        calendar,
        students: student_rows,
        summary: attendance_summary(&all),
    }
}

// ---------------------------------------------------------------------------
// Dashboard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_students: usize,
    pub active_batches: usize,
    pub today_present: i64,
    pub today_marked: i64,
    pub month_collection: f64,
    pub pending_total: f64,
    pub pending_students: usize,
}

pub fn dashboard_stats(
    ledger: &[FeeLedgerEntry],
    batches: &[Batch],
    payments: &[FeePayment],
    attendance: &[AttendanceMark],
    today: NaiveDate,
) -> DashboardStats {
    let today_marks: Vec<&AttendanceMark> =
        attendance.iter().filter(|m| m.date == today).collect();
    let pending: Vec<&FeeLedgerEntry> = ledger.iter().filter(|e| e.remaining_due > 0.0).collect();
    DashboardStats {
        total_students: ledger.len(),
        active_batches: batches.iter().filter(|b| b.is_active()).count(),
        today_present: today_marks
            .iter()
            .filter(|m| m.status == MarkStatus::Present)
            .count() as i64,
        today_marked: today_marks.len() as i64,
        month_collection: payments
            .iter()
            .filter(|p| {
                p.payment_date.year() == today.year() && p.payment_date.month() == today.month()
            })
            .map(|p| p.amount)
            .sum(),
        pending_total: pending.iter().map(|e| e.remaining_due).sum(),
        pending_students: pending.len(),
    }
}

// ---------------------------------------------------------------------------
// Batch performance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub name: String,
    pub date: String,
    pub average: i64,
    pub highest: i64,
    pub lowest: i64,
}

fn trend_label(test: &Test) -> String {
    if test.name.is_empty() {
        fmt_date(test.date)
    } else {
        test.name.chars().take(10).collect()
    }
}

/// Per-test trend, oldest first. Tests where nobody has a qualifying score
/// contribute no point.
pub fn batch_test_trend(tests: &[Test]) -> Vec<TrendPoint> {
    let mut ordered: Vec<&Test> = tests.iter().collect();
    ordered.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
    ordered
        .into_iter()
        .filter_map(|test| {
            let percents: Vec<f64> = test
                .scores
                .iter()
                .filter_map(|s| s.qualifying_marks())
                .map(|m| score_percent(m, test.total_marks))
                .collect();
            if percents.is_empty() {
                return None;
            }
            let highest = percents.iter().cloned().fold(0.0, f64::max);
            let lowest = percents.iter().cloned().fold(f64::INFINITY, f64::min);
            Some(TrendPoint {
                name: trend_label(test),
                date: fmt_date(test.date),
                average: round_percent(average_for_set(&percents)),
                highest: round_percent(highest),
                lowest: round_percent(lowest),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAverage {
    pub subject: String,
    pub average: i64,
    pub tests: usize,
}

/// Subject-wise averages, best subject first. Tests without a subject fall
/// under "General".
pub fn subject_averages(tests: &[Test]) -> Vec<SubjectAverage> {
    let mut by_subject: HashMap<String, (Vec<f64>, usize)> = HashMap::new();
    for test in tests {
        let entry = by_subject.entry(default_subject(&test.subject)).or_default();
        entry.1 += 1;
        for score in &test.scores {
            if let Some(m) = score.qualifying_marks() {
                entry.0.push(score_percent(m, test.total_marks));
            }
        }
    }
    let mut rows: Vec<SubjectAverage> = by_subject
        .into_iter()
        .map(|(subject, (percents, tests))| SubjectAverage {
            subject,
            average: round_percent(average_for_set(&percents)),
            tests,
        })
        .collect();
    rows.sort_by(|a, b| b.average.cmp(&a.average).then_with(|| a.subject.cmp(&b.subject)));
    rows
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub avg_score: i64,
    pub total_tests: usize,
    pub avg_attendance: i64,
    pub top_performers: usize,
    pub needs_attention: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPerformance {
    pub stats: BatchStats,
    pub trend: Vec<TrendPoint>,
    pub subjects: Vec<SubjectAverage>,
    pub rankings: Vec<RankedStudent>,
    pub grade_distribution: Vec<GradeBucket>,
}

pub fn batch_performance(
    students: &[Student],
    tests: &[Test],
    attendance: &[AttendanceMark],
) -> BatchPerformance {
    let names: HashMap<String, String> = students
        .iter()
        .map(|s| (s.id.clone(), s.full_name.clone()))
        .collect();
    let rankings = rank_students(tests, &names, attendance);
    let averages: Vec<i64> = rankings.iter().map(|r| r.avg_score).collect();

    let all_percents: Vec<f64> = tests
        .iter()
        .flat_map(|t| {
            t.scores
                .iter()
                .filter_map(move |s| s.qualifying_marks().map(|m| score_percent(m, t.total_marks)))
        })
        .collect();
    let present = attendance.iter().filter(|m| m.status == MarkStatus::Present).count() as i64;

    BatchPerformance {
        stats: BatchStats {
            avg_score: round_percent(average_for_set(&all_percents)),
            total_tests: tests.len(),
            avg_attendance: attendance_percentage(present, attendance.len() as i64),
            top_performers: averages.iter().filter(|&&a| a >= 80).count(),
            needs_attention: averages.iter().filter(|&&a| a < 50).count(),
        },
        trend: batch_test_trend(tests),
        subjects: subject_averages(tests),
        grade_distribution: grade_distribution(&averages),
        rankings,
    }
}

// ---------------------------------------------------------------------------
// Student performance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Passed,
    Failed,
    Absent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentTrendPoint {
    pub name: String,
    pub date: String,
    pub percent: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRadarPoint {
    pub subject: String,
    pub score: i64,
    pub full_mark: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentResultRow {
    pub test_id: String,
    pub test_name: String,
    pub subject: String,
    pub date: String,
    pub marks_obtained: Option<f64>,
    pub total_marks: f64,
    pub percent: i64,
    pub status: ResultStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStats {
    pub avg_score: i64,
    pub total_tests: usize,
    pub passed_tests: usize,
    pub attendance: i64,
    pub improvement: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentPerformance {
    pub stats: StudentStats,
    pub trend: Vec<StudentTrendPoint>,
    pub subjects: Vec<SubjectRadarPoint>,
    pub results: Vec<StudentResultRow>,
}

/// Average of the last three qualifying percentages minus the first three,
/// in chronological order. Needs at least six data points to say anything.
pub fn improvement_figure(percents: &[f64]) -> i64 {
    if percents.len() < 6 {
        return 0;
    }
    let first = average_for_set(&percents[..3]);
    let last = average_for_set(&percents[percents.len() - 3..]);
    round_percent(last - first)
}

pub fn student_performance(
    student: &Student,
    batch_tests: &[Test],
    attendance: &[AttendanceMark],
) -> StudentPerformance {
    let mut ordered: Vec<&Test> = batch_tests.iter().collect();
    ordered.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));

    let mut trend = Vec::new();
    let mut chrono_percents: Vec<f64> = Vec::new();
    let mut results = Vec::new();
    let mut by_subject: HashMap<String, Vec<f64>> = HashMap::new();
    let mut passed = 0;

    for test in &ordered {
        let score = match test.scores.iter().find(|s| s.student_id == student.id) {
            Some(s) => s,
            None => continue,
        };
        let subject = default_subject(&test.subject);
        match score.qualifying_marks() {
            Some(marks) => {
                let percent = score_percent(marks, test.total_marks);
                chrono_percents.push(percent);
                by_subject.entry(subject.clone()).or_default().push(percent);
                trend.push(StudentTrendPoint {
                    name: trend_label(test),
                    date: fmt_date(test.date),
                    percent: round_percent(percent),
                });
                let pass = marks >= test.total_marks / 3.0;
                if pass {
                    passed += 1;
                }
                results.push(StudentResultRow {
                    test_id: test.id.clone(),
                    test_name: test.name.clone(),
                    subject,
                    date: fmt_date(test.date),
                    marks_obtained: Some(marks),
                    total_marks: test.total_marks,
                    percent: round_percent(percent),
                    status: if pass { ResultStatus::Passed } else { ResultStatus::Failed },
                });
            }
            None => {
                results.push(StudentResultRow {
                    test_id: test.id.clone(),
                    test_name: test.name.clone(),
                    subject,
                    date: fmt_date(test.date),
                    marks_obtained: None,
                    total_marks: test.total_marks,
                    percent: 0,
                    status: ResultStatus::Absent,
                });
            }
        }
    }
    // Result rows come out newest first.
    results.reverse();

    let mut subjects: Vec<SubjectRadarPoint> = by_subject
        .into_iter()
        .map(|(subject, percents)| SubjectRadarPoint {
            subject,
            score: round_percent(average_for_set(&percents)),
            full_mark: 100,
        })
        .collect();
    subjects.sort_by(|a, b| a.subject.cmp(&b.subject));

    let mine: Vec<&AttendanceMark> = attendance
        .iter()
        .filter(|m| m.student_id == student.id)
        .collect();
    let present = mine.iter().filter(|m| m.status == MarkStatus::Present).count() as i64;

    StudentPerformance {
        stats: StudentStats {
            avg_score: round_percent(average_for_set(&chrono_percents)),
            total_tests: chrono_percents.len(),
            passed_tests: passed,
            attendance: attendance_percentage(present, mine.len() as i64),
            improvement: improvement_figure(&chrono_percents),
        },
        trend,
        subjects,
        results,
    }
}

// ---------------------------------------------------------------------------
// Org-wide analytics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgStats {
    pub avg_score: i64,
    pub tests_count: usize,
    pub avg_attendance: i64,
    pub top_performers: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAverage {
    pub name: String,
    pub average: i64,
    pub students: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformerRow {
    pub student_id: String,
    pub name: String,
    pub batch_name: Option<String>,
    pub avg_score: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DistributionBucket {
    pub name: String,
    pub value: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgOverview {
    pub stats: OrgStats,
    pub batch_wise: Vec<BatchAverage>,
    pub top_performers: Vec<PerformerRow>,
    pub needs_attention: Vec<PerformerRow>,
    pub attendance_distribution: Vec<DistributionBucket>,
    pub subject_wise: Vec<SubjectAverage>,
}

pub fn org_overview(
    students: &[Student],
    batches: &[Batch],
    tests: &[Test],
    attendance: &[AttendanceMark],
) -> OrgOverview {
    let by_student = qualifying_percents_by_student(tests);
    let averages: HashMap<String, i64> = by_student
        .iter()
        .map(|(id, percents)| (id.clone(), round_percent(average_for_set(percents))))
        .collect();

    let all_percents: Vec<f64> = tests
        .iter()
        .flat_map(|t| {
            t.scores
                .iter()
                .filter_map(move |s| s.qualifying_marks().map(|m| score_percent(m, t.total_marks)))
        })
        .collect();
    let present = attendance.iter().filter(|m| m.status == MarkStatus::Present).count() as i64;

    let stats = OrgStats {
        avg_score: round_percent(average_for_set(&all_percents)),
        tests_count: tests.len(),
        avg_attendance: attendance_percentage(present, attendance.len() as i64),
        top_performers: averages.values().filter(|&&a| a >= 85).count(),
    };

    let mut batch_wise = Vec::new();
    for batch in batches {
        let enrolled: Vec<&Student> = students
            .iter()
            .filter(|s| s.batch_id.as_deref() == Some(batch.id.as_str()))
            .collect();
        if enrolled.is_empty() {
            continue;
        }
        let percents: Vec<f64> = enrolled
            .iter()
            .filter_map(|s| by_student.get(&s.id))
            .flatten()
            .cloned()
            .collect();
        batch_wise.push(BatchAverage {
            name: batch.name.chars().take(15).collect(),
            average: round_percent(average_for_set(&percents)),
            students: enrolled.len(),
        });
    }

    let mut rows: Vec<PerformerRow> = students
        .iter()
        .filter_map(|s| {
            averages.get(&s.id).map(|&avg| PerformerRow {
                student_id: s.id.clone(),
                name: s.full_name.clone(),
                batch_name: s.batch_name.clone(),
                avg_score: avg,
            })
        })
        .collect();
    rows.sort_by(|a, b| b.avg_score.cmp(&a.avg_score).then_with(|| a.student_id.cmp(&b.student_id)));
    let top_performers: Vec<PerformerRow> =
        rows.iter().filter(|r| r.avg_score >= 80).take(5).cloned().collect();
    let mut low: Vec<PerformerRow> = rows.iter().filter(|r| r.avg_score < 60).cloned().collect();
    low.reverse();
    let needs_attention: Vec<PerformerRow> = low.into_iter().take(5).collect();

    let mut dist_counts = [0usize; 4];
    for s in students {
        let mine: Vec<&AttendanceMark> =
            attendance.iter().filter(|m| m.student_id == s.id).collect();
        if mine.is_empty() {
            continue;
        }
        let p = mine.iter().filter(|m| m.status == MarkStatus::Present).count() as i64;
        let pct = attendance_percentage(p, mine.len() as i64);
        let slot = if pct >= 90 {
            0
        } else if pct >= 75 {
            1
        } else if pct >= 60 {
            2
        } else {
            3
        };
        dist_counts[slot] += 1;
    }
    let dist_labels = ["≥90%", "75-89%", "60-74%", "<60%"];
    let mut attendance_distribution: Vec<DistributionBucket> = dist_labels
        .iter()
        .zip(dist_counts.iter())
        .filter(|(_, &c)| c > 0)
        .map(|(label, &c)| DistributionBucket {
            name: label.to_string(),
            value: c,
        })
        .collect();
    if attendance_distribution.is_empty() {
        attendance_distribution = vec![DistributionBucket {
            name: NO_DATA_LABEL.to_string(),
            value: 1,
        }];
    }

    let subject_wise: Vec<SubjectAverage> = subject_averages(tests)
        .into_iter()
        .filter(|s| s.average > 0)
        .collect();

    OrgOverview {
        stats,
        batch_wise,
        top_performers,
        needs_attention,
        attendance_distribution,
        subject_wise,
    }
}
