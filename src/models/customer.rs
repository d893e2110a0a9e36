use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Customer country, encoded as a small integer at the API boundary
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
    IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Geography {
    France,
    Spain,
    Germany,
}

impl Geography {
    /// Decode the wire code (0=France, 1=Spain, 2=Germany)
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Geography::France),
            1 => Some(Geography::Spain),
            2 => Some(Geography::Germany),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Geography::France => 0,
            Geography::Spain => 1,
            Geography::Germany => 2,
        }
    }

    /// Parse either a numeric code or a country name
    pub fn parse_field(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match parse_code(raw) {
            Some(code) => Self::from_code(code),
            None => raw.parse().ok(),
        }
    }
}

/// Customer gender, encoded as 0=Male, 1=Female at the API boundary
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
    IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Gender::Male),
            1 => Some(Gender::Female),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Gender::Male => 0,
            Gender::Female => 1,
        }
    }

    /// Parse either a numeric code or a gender name
    pub fn parse_field(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match parse_code(raw) {
            Some(code) => Self::from_code(code),
            None => raw.parse().ok(),
        }
    }
}

/// Accepts integral numbers written as "2" or "2.0"
fn parse_code(raw: &str) -> Option<i64> {
    let value: f64 = raw.parse().ok()?;
    if value.is_finite() && value.fract() == 0.0 {
        Some(value as i64)
    } else {
        None
    }
}

/// Raw customer attributes as received from a client or a CSV row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Request-level identifier (`id` column)
    pub id: i64,
    pub customer_id: i64,
    pub surname: String,
    pub row_number: i64,

    pub credit_score: f64,
    pub age: f64,
    pub tenure: f64,
    pub balance: f64,
    pub num_of_products: f64,
    pub has_cr_card: f64,
    pub is_active_member: f64,
    pub estimated_salary: f64,
    pub geography: Geography,
    pub gender: Gender,
}

impl Default for RawRecord {
    /// Defaults used when a single-prediction request omits a field
    fn default() -> Self {
        Self {
            id: 0,
            customer_id: 0,
            surname: "A".to_string(),
            row_number: 0,
            credit_score: 650.0,
            age: 40.0,
            tenure: 5.0,
            balance: 0.0,
            num_of_products: 1.0,
            has_cr_card: 1.0,
            is_active_member: 1.0,
            estimated_salary: 100_000.0,
            geography: Geography::France,
            gender: Gender::Male,
        }
    }
}

impl RawRecord {
    /// Human-readable echo of the inputs, returned alongside a prediction
    pub fn readable(&self) -> ReadableRecord {
        ReadableRecord {
            credit_score: self.credit_score,
            age: self.age,
            tenure: self.tenure,
            balance: format!("${:.2}", self.balance),
            num_of_products: self.num_of_products,
            has_credit_card: yes_no(self.has_cr_card),
            active_member: yes_no(self.is_active_member),
            estimated_salary: format!("${:.2}", self.estimated_salary),
            geography: self.geography.to_string(),
            gender: self.gender.to_string(),
        }
    }
}

fn yes_no(flag: f64) -> String {
    let label = if flag == 1.0 { "Yes" } else { "No" };
    label.to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadableRecord {
    #[serde(rename = "Credit Score")]
    pub credit_score: f64,
    #[serde(rename = "Age")]
    pub age: f64,
    #[serde(rename = "Tenure (years)")]
    pub tenure: f64,
    #[serde(rename = "Balance")]
    pub balance: String,
    #[serde(rename = "Products Held")]
    pub num_of_products: f64,
    #[serde(rename = "Has Credit Card")]
    pub has_credit_card: String,
    #[serde(rename = "Active Member")]
    pub active_member: String,
    #[serde(rename = "Estimated Salary")]
    pub estimated_salary: String,
    #[serde(rename = "Geography")]
    pub geography: String,
    #[serde(rename = "Gender")]
    pub gender: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geography_codes() {
        assert_eq!(Geography::from_code(0), Some(Geography::France));
        assert_eq!(Geography::from_code(2), Some(Geography::Germany));
        assert_eq!(Geography::from_code(3), None);
        assert_eq!(Geography::Spain.code(), 1);
    }

    #[test]
    fn test_parse_field_accepts_codes_and_names() {
        assert_eq!(Geography::parse_field("2"), Some(Geography::Germany));
        assert_eq!(Geography::parse_field("1.0"), Some(Geography::Spain));
        assert_eq!(Geography::parse_field("germany"), Some(Geography::Germany));
        assert_eq!(Geography::parse_field("Italy"), None);
        assert_eq!(Geography::parse_field("1.5"), None);

        assert_eq!(Gender::parse_field("1"), Some(Gender::Female));
        assert_eq!(Gender::parse_field("Male"), Some(Gender::Male));
        assert_eq!(Gender::parse_field("2"), None);
    }

    #[test]
    fn test_readable_record() {
        let record = RawRecord {
            balance: 1234.5,
            has_cr_card: 0.0,
            geography: Geography::Germany,
            gender: Gender::Female,
            ..Default::default()
        };
        let readable = record.readable();

        assert_eq!(readable.balance, "$1234.50");
        assert_eq!(readable.has_credit_card, "No");
        assert_eq!(readable.active_member, "Yes");
        assert_eq!(readable.geography, "Germany");
        assert_eq!(readable.gender, "Female");

        let json = serde_json::to_value(&readable).unwrap();
        assert_eq!(json["Estimated Salary"], "$100000.00");
    }
}
