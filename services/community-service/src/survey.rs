use std::fmt;

use serde::{Deserialize, Serialize};

/// Participation states a contributor can move through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SurveyStatus {
    ResponseNotTaken,
    AgreeToParticipate,
    DenyToParticipate,
    DenyToParticipateInFinalSurvey,
    AllSurveysComplete,
}

impl SurveyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurveyStatus::ResponseNotTaken => "RESPONSE_NOT_TAKEN",
            SurveyStatus::AgreeToParticipate => "AGREE_TO_PARTICIPATE",
            SurveyStatus::DenyToParticipate => "DENY_TO_PARTICIPATE",
            SurveyStatus::DenyToParticipateInFinalSurvey => "DENY_TO_PARTICIPATE_IN_FINAL_SURVEY",
            SurveyStatus::AllSurveysComplete => "ALL_SURVEYS_COMPLETE",
        }
    }
}

impl fmt::Display for SurveyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SurveyStatus {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "RESPONSE_NOT_TAKEN" => Ok(SurveyStatus::ResponseNotTaken),
            "AGREE_TO_PARTICIPATE" => Ok(SurveyStatus::AgreeToParticipate),
            "DENY_TO_PARTICIPATE" => Ok(SurveyStatus::DenyToParticipate),
            "DENY_TO_PARTICIPATE_IN_FINAL_SURVEY" => {
                Ok(SurveyStatus::DenyToParticipateInFinalSurvey)
            }
            "ALL_SURVEYS_COMPLETE" => Ok(SurveyStatus::AllSurveysComplete),
            _ => Err(()),
        }
    }
}

/// Which survey the frontend should render for a contributor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurveyType {
    Initial,
    Final,
    None,
}

impl SurveyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurveyType::Initial => "INITIAL",
            SurveyType::Final => "FINAL",
            SurveyType::None => "NONE",
        }
    }
}

/// Contributors who opted in graduate to the final survey once their
/// contribution count passes the requirement. Terminal states get nothing.
pub fn select_survey_type(
    recorded: Option<SurveyStatus>,
    task_runs: i64,
    requirement: i64,
) -> SurveyType {
    match recorded {
        Some(SurveyStatus::DenyToParticipate)
        | Some(SurveyStatus::DenyToParticipateInFinalSurvey)
        | Some(SurveyStatus::AllSurveysComplete) => SurveyType::None,
        Some(SurveyStatus::AgreeToParticipate) if task_runs > requirement => SurveyType::Final,
        _ => SurveyType::Initial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parses_all_known_states() {
        for name in [
            "RESPONSE_NOT_TAKEN",
            "AGREE_TO_PARTICIPATE",
            "DENY_TO_PARTICIPATE",
            "DENY_TO_PARTICIPATE_IN_FINAL_SURVEY",
            "ALL_SURVEYS_COMPLETE",
        ] {
            let status = SurveyStatus::from_str(name).unwrap();
            assert_eq!(status.as_str(), name);
        }
        assert!(SurveyStatus::from_str("MAYBE_LATER").is_err());
        assert!(SurveyStatus::from_str("agree_to_participate").is_err());
    }

    #[test]
    fn unsurveyed_contributors_get_the_initial_survey() {
        assert_eq!(select_survey_type(None, 0, 30), SurveyType::Initial);
        assert_eq!(
            select_survey_type(Some(SurveyStatus::ResponseNotTaken), 100, 30),
            SurveyType::Initial
        );
    }

    #[test]
    fn final_survey_requires_consent_and_enough_contributions() {
        assert_eq!(
            select_survey_type(Some(SurveyStatus::AgreeToParticipate), 31, 30),
            SurveyType::Final
        );
        assert_eq!(
            select_survey_type(Some(SurveyStatus::AgreeToParticipate), 30, 30),
            SurveyType::Initial
        );
        assert_eq!(
            select_survey_type(Some(SurveyStatus::AgreeToParticipate), 0, 30),
            SurveyType::Initial
        );
    }

    #[test]
    fn terminal_states_render_no_survey() {
        for status in [
            SurveyStatus::DenyToParticipate,
            SurveyStatus::DenyToParticipateInFinalSurvey,
            SurveyStatus::AllSurveysComplete,
        ] {
            assert_eq!(select_survey_type(Some(status), 1_000, 30), SurveyType::None);
        }
    }

    #[test]
    fn serializes_with_wire_names() {
        let json = serde_json::to_string(&SurveyStatus::DenyToParticipateInFinalSurvey).unwrap();
        assert_eq!(json, "\"DENY_TO_PARTICIPATE_IN_FINAL_SURVEY\"");
    }
}
