use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct Student {
    pub id: String,
    pub batch_id: Option<String>,
    pub full_name: String,
    pub phone: Option<String>,
    pub joining_date: NaiveDate,
    // Joined from the batch row so ledger callers don't re-fetch it.
    pub batch_name: Option<String>,
    pub monthly_fee: f64,
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub id: String,
    pub name: String,
    pub subject: Option<String>,
    pub monthly_fee: f64,
    pub capacity: i64,
    pub status: String,
}

impl Batch {
    pub fn is_active(&self) -> bool {
        self.status == "Active"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkStatus {
    Present,
    Absent,
}

impl MarkStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "present" => Some(MarkStatus::Present),
            "absent" => Some(MarkStatus::Absent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MarkStatus::Present => "present",
            MarkStatus::Absent => "absent",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TestScore {
    pub id: String,
    pub test_id: String,
    pub student_id: String,
    pub marks_obtained: Option<f64>,
    pub status: MarkStatus,
}

impl TestScore {
    /// A score counts toward averages only when the student sat the test
    /// and a mark was actually entered. Absences are excluded, not zeroed.
    pub fn qualifying_marks(&self) -> Option<f64> {
        match self.status {
            MarkStatus::Present => self.marks_obtained,
            MarkStatus::Absent => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Test {
    pub id: String,
    pub batch_id: String,
    pub name: String,
    pub subject: Option<String>,
    pub total_marks: f64,
    pub date: NaiveDate,
    pub scores_entered: bool,
    pub scores: Vec<TestScore>,
}

#[derive(Debug, Clone)]
pub struct FeePayment {
    pub id: String,
    pub student_id: String,
    pub amount: f64,
    pub payment_date: NaiveDate,
    pub payment_mode: Option<String>,
    pub months_covered: Vec<String>,
    pub notes: Option<String>,
    pub student_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AttendanceMark {
    pub id: String,
    pub batch_id: String,
    pub student_id: String,
    pub date: NaiveDate,
    pub status: MarkStatus,
}

#[derive(Debug, Clone)]
pub struct Expense {
    pub id: String,
    pub expense_date: NaiveDate,
    pub category: String,
    pub amount: f64,
    pub payment_mode: Option<String>,
    pub description: Option<String>,
}
