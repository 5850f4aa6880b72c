use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::{fmt, str::FromStr};

use crate::error::CreditError;

/// Course identifier split into the three parts providers receive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr)]
pub struct CourseKey {
    pub org: String,
    pub course: String,
    pub run: String,
}

impl CourseKey {
    pub fn new(org: impl Into<String>, course: impl Into<String>, run: impl Into<String>) -> Self {
        Self { org: org.into(), course: course.into(), run: run.into() }
    }
}

impl fmt::Display for CourseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "course-v1:{}+{}+{}", self.org, self.course, self.run)
    }
}

impl FromStr for CourseKey {
    type Err = CreditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "course-v1:Org+Num+Run" or the older "Org/Num/Run"
        let parts: Vec<&str> = match s.strip_prefix("course-v1:") {
            Some(rest) => rest.split('+').collect(),
            None => s.split('/').collect(),
        };
        match parts.as_slice() {
            [org, course, run] if !org.is_empty() && !course.is_empty() && !run.is_empty() => {
                Ok(Self::new(*org, *course, *run))
            }
            _ => Err(CreditError::InvalidCourseKey(s.to_string())),
        }
    }
}
