use serde_json::Value;

use crate::catalog::WorkbookEntry;
use crate::error::AiError;

/// Weeks to plan when the request does not say.
pub const DEFAULT_WEEK_COUNT: u32 = 4;

/// Today's date in the `YYYY-MM-DD` form used as the schedule's top-level
/// key.
pub fn today_key() -> String {
    let format = time::macros::format_description!("[year]-[month]-[day]");
    time::OffsetDateTime::now_utc()
        .date()
        .format(&format)
        .expect("static date format")
}

fn to_pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn workbooks_json(entries: &[WorkbookEntry]) -> String {
    serde_json::to_string_pretty(entries).unwrap_or_else(|_| "[]".to_string())
}

/// The exact JSON shape the model must reply with: one top-level date key,
/// week-index keys "1".."N", each a list of per-student week plans.
fn schedule_shape(date_key: &str, week_count: u32) -> String {
    let mut shape = format!("{{\n  \"{date_key}\": {{\n");
    for week in 1..=week_count {
        let sep = if week < week_count { "," } else { "" };
        shape.push_str(&format!(
            "    \"{week}\": [ {{ \"name\": \"<학생ID>\", \"weekplan\": {{ \"day1\": [{{...}}], ... \"day7\": [{{...}}] }} }} ]{sep}\n"
        ));
    }
    shape.push_str("  }\n}");
    shape
}

/// Build the initial schedule-generation prompt from the student snapshot
/// and the catalog entries relevant to them.
pub fn build_initial_prompt(
    profile: &Value,
    relevant: &[WorkbookEntry],
    week_count: u32,
    goal: Option<&str>,
) -> String {
    let date_key = today_key();
    let mut prompt = format!(
        "당신은 전문 학습 컨설턴트입니다. 학생의 데이터와 제공된 참고 문제집 데이터를 바탕으로, 구체적이고 실천 가능한 {week_count}주간의 주간 학습 계획표를 작성해주세요.\n\n\
[지시사항]\n\
1. 아래 [학생 데이터]와 [참고 문제집 데이터]를 정밀하게 분석하세요.\n\
2. [참고 문제집 데이터]에 있는 단원('work' 리스트)들을 {week_count}주 동안 균등하고 논리적으로 배분하여 학습 계획을 세워주세요.\n\
3. 각 계획 항목에는 과목('subject'), 출판사('publish'), 문제집 이름('workbook'), 공부할 단원명('scope'), 중요도('importance': 1~5), 완료 여부('isFinished': false)가 포함되어야 합니다.\n\
4. 학생이 지치지 않도록 주말(day6, day7)에는 학습량을 줄이거나 복습, 휴식을 배치해주세요.\n\
5. 최종 결과는 반드시 아래 [출력 JSON 형식]에 맞춰 다른 설명 없이 JSON 객체만 반환해주세요.\n\n\
[학생 데이터]\n{student}\n\n\
[참고 문제집 데이터]\n{workbooks}\n\n",
        student = to_pretty(profile),
        workbooks = workbooks_json(relevant),
    );
    if let Some(goal) = goal {
        if !goal.trim().is_empty() {
            prompt.push_str(&format!("[학습 목표]\n{goal}\n\n"));
        }
    }
    prompt.push_str(&format!(
        "[출력 JSON 형식]\n{}\n",
        schedule_shape(&date_key, week_count)
    ));
    prompt
}

/// Conversational revision prompt: original schedule plus a free-form
/// modification payload, asking for a complete replacement document.
///
/// Deprecated in favor of the grounded [`RevisionRequest`] form, kept for
/// callers still on the two-argument contract.
pub fn build_revision_prompt(original: &Value, modification: &Value) -> String {
    format!(
        "당신은 학생의 기존 학습 스케줄을 사용자의 새로운 요구사항에 맞게 수정하는 AI 학습 코치입니다.\n\n\
[기존 학습 스케줄]\n{original}\n\n\
[수정 요청 사항]\n{modification}\n\n\
[지시사항]\n\
1. [수정 요청 사항]을 [기존 학습 스케줄]에 자연스럽게 반영하여 전체 계획을 재구성해주세요.\n\
2. 특정 과목의 변경, 추가 또는 삭제 요청을 정확히 이행하고, 나머지 공부 시간과의 균형을 맞춰주세요.\n\
3. 결과는 다른 설명 없이 수정된 '완전한 형태의 계획표 JSON 객체'로만 제공해주세요.",
        original = to_pretty(original),
        modification = to_pretty(modification),
    )
}

/// Inputs for the grounded revision contract. All four must be non-empty;
/// validation happens before any network round trip.
pub struct RevisionRequest<'a> {
    pub profile: &'a Value,
    pub catalog: &'a [WorkbookEntry],
    pub existing: &'a Value,
    pub feedback: &'a str,
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Recursively collect every `(publish, workbook)` string pair that appears
/// as sibling keys anywhere inside a schedule document. First occurrence
/// order, duplicates dropped.
pub fn scan_workbook_refs(value: &Value) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    collect_refs(value, &mut pairs);
    pairs
}

fn collect_refs(value: &Value, pairs: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            if let (Some(Value::String(publish)), Some(Value::String(workbook))) =
                (map.get("publish"), map.get("workbook"))
            {
                let pair = (publish.clone(), workbook.clone());
                if !pairs.contains(&pair) {
                    pairs.push(pair);
                }
            }
            for child in map.values() {
                collect_refs(child, pairs);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_refs(item, pairs);
            }
        }
        _ => {}
    }
}

/// Build the grounded revision prompt, re-deriving the reference workbooks
/// from the pairs discoverable in the existing schedule. Pure function: a
/// validation failure costs no network call.
pub fn build_grounded_revision_prompt(req: &RevisionRequest<'_>) -> Result<String, AiError> {
    if is_empty_value(req.profile) {
        return Err(AiError::MissingInput("student data"));
    }
    if req.catalog.is_empty() {
        return Err(AiError::MissingInput("workbook data"));
    }
    if is_empty_value(req.existing) {
        return Err(AiError::MissingInput("existing schedule"));
    }
    if req.feedback.trim().is_empty() {
        return Err(AiError::MissingInput("feedback"));
    }

    let pairs = scan_workbook_refs(req.existing);
    let grounded: Vec<WorkbookEntry> = req
        .catalog
        .iter()
        .filter(|e| {
            pairs
                .iter()
                .any(|(publish, workbook)| e.publish == *publish && e.workbook == *workbook)
        })
        .cloned()
        .collect();
    // Nothing discoverable in the old schedule: fall back to everything the
    // caller scoped to this student's grade.
    let grounded = if grounded.is_empty() {
        req.catalog.to_vec()
    } else {
        grounded
    };

    let date_key = today_key();
    Ok(format!(
        "당신은 학생의 기존 학습 스케줄을 사용자의 피드백에 맞게 수정하는 AI 학습 코치입니다. 오늘 날짜는 {date_key}입니다.\n\n\
[학생 데이터]\n{student}\n\n\
[기존 학습 스케줄]\n{existing}\n\n\
[참고 문제집 데이터]\n{workbooks}\n\n\
[학생 피드백]\n{feedback}\n\n\
[지시사항]\n\
1. [학생 피드백]을 [기존 학습 스케줄]에 자연스럽게 반영하여 전체 계획을 재구성해주세요.\n\
2. [참고 문제집 데이터]에 없는 문제집이나 단원을 새로 만들어내지 마세요.\n\
3. 수정된 계획표의 최상위 키는 오늘 날짜({date_key})로 다시 지정해주세요.\n\
4. 결과는 다른 설명 없이 아래 [출력 JSON 형식]의 '완전한 형태의 계획표 JSON 객체'로만 제공해주세요.\n\n\
[출력 JSON 형식]\n{shape}",
        student = to_pretty(req.profile),
        existing = to_pretty(req.existing),
        workbooks = workbooks_json(&grounded),
        feedback = req.feedback,
        shape = schedule_shape(&date_key, DEFAULT_WEEK_COUNT),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(publish: &str, workbook: &str, work: &[&str]) -> WorkbookEntry {
        WorkbookEntry {
            grade: "ms1".into(),
            publish: publish.into(),
            workbook: workbook.into(),
            work: work.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn initial_prompt_embeds_topic_units() {
        let profile = json!({ "userID": "stu1", "grade": "ms1" });
        let relevant = vec![entry("A", "Math", &["Ch1", "Ch2"])];
        let prompt = build_initial_prompt(&profile, &relevant, DEFAULT_WEEK_COUNT, None);

        assert!(prompt.contains("Ch1"));
        assert!(prompt.contains("Ch2"));
        assert!(prompt.contains("stu1"));
        assert!(prompt.contains("4주간"));
        assert!(prompt.contains(&today_key()));
    }

    #[test]
    fn initial_prompt_honors_week_count_and_goal() {
        let profile = json!({ "userID": "stu1" });
        let relevant = vec![entry("A", "Math", &["Ch1"])];
        let prompt = build_initial_prompt(&profile, &relevant, 6, Some("기말 대비"));

        assert!(prompt.contains("6주간"));
        assert!(prompt.contains("\"6\":"));
        assert!(!prompt.contains("\"7\":"));
        assert!(prompt.contains("기말 대비"));
    }

    #[test]
    fn shape_lists_every_week_and_all_seven_days() {
        let shape = schedule_shape("2026-01-01", 4);
        for week in 1..=4 {
            assert!(shape.contains(&format!("\"{week}\":")));
        }
        assert!(shape.contains("day1"));
        assert!(shape.contains("day7"));
    }

    #[test]
    fn scan_finds_sibling_pairs_nested_anywhere() {
        let schedule = json!({
            "2026-08-25": {
                "1": [{
                    "name": "stu1",
                    "weekplan": {
                        "day1": [
                            { "subject": "수학", "publish": "A", "workbook": "Math" },
                            { "subject": "국어", "publish": "B", "workbook": "Korean" }
                        ],
                        "day2": [
                            { "subject": "수학", "publish": "A", "workbook": "Math" }
                        ]
                    }
                }]
            }
        });
        let pairs = scan_workbook_refs(&schedule);
        assert_eq!(
            pairs,
            vec![
                ("A".to_string(), "Math".to_string()),
                ("B".to_string(), "Korean".to_string()),
            ]
        );
    }

    #[test]
    fn scan_ignores_objects_missing_one_sibling() {
        let doc = json!({ "publish": "A", "other": "Math" });
        assert!(scan_workbook_refs(&doc).is_empty());
    }

    #[test]
    fn grounded_revision_rejects_each_missing_input() {
        let profile = json!({ "userID": "stu1" });
        let catalog = vec![entry("A", "Math", &["Ch1"])];
        let existing = json!({ "2026-08-01": { "1": [] } });

        let err = build_grounded_revision_prompt(&RevisionRequest {
            profile: &json!({}),
            catalog: &catalog,
            existing: &existing,
            feedback: "좀 더 쉬운 순서로",
        })
        .unwrap_err();
        assert!(matches!(err, AiError::MissingInput("student data")));

        let err = build_grounded_revision_prompt(&RevisionRequest {
            profile: &profile,
            catalog: &[],
            existing: &existing,
            feedback: "좀 더 쉬운 순서로",
        })
        .unwrap_err();
        assert!(matches!(err, AiError::MissingInput("workbook data")));

        let err = build_grounded_revision_prompt(&RevisionRequest {
            profile: &profile,
            catalog: &catalog,
            existing: &json!({}),
            feedback: "좀 더 쉬운 순서로",
        })
        .unwrap_err();
        assert!(matches!(err, AiError::MissingInput("existing schedule")));

        let err = build_grounded_revision_prompt(&RevisionRequest {
            profile: &profile,
            catalog: &catalog,
            existing: &existing,
            feedback: "   ",
        })
        .unwrap_err();
        assert!(matches!(err, AiError::MissingInput("feedback")));
    }

    #[test]
    fn grounded_revision_filters_to_discovered_pairs() {
        let profile = json!({ "userID": "stu1", "grade": "ms1" });
        let catalog = vec![
            entry("A", "Math", &["MathCh1"]),
            entry("B", "Korean", &["KoreanCh1"]),
        ];
        let existing = json!({
            "2026-08-01": {
                "1": [{ "weekplan": { "day1": [
                    { "publish": "A", "workbook": "Math", "scope": "MathCh1" }
                ]}}]
            }
        });

        let prompt = build_grounded_revision_prompt(&RevisionRequest {
            profile: &profile,
            catalog: &catalog,
            existing: &existing,
            feedback: "수학 진도를 늦춰주세요",
        })
        .unwrap();

        assert!(prompt.contains("MathCh1"));
        assert!(!prompt.contains("KoreanCh1"));
        assert!(prompt.contains(&today_key()));
    }

    #[test]
    fn grounded_revision_falls_back_to_full_catalog() {
        let profile = json!({ "userID": "stu1" });
        let catalog = vec![entry("B", "Korean", &["KoreanCh1"])];
        // Schedule with no discoverable publish/workbook siblings.
        let existing = json!({ "2026-08-01": { "1": [{ "note": "rest week" }] } });

        let prompt = build_grounded_revision_prompt(&RevisionRequest {
            profile: &profile,
            catalog: &catalog,
            existing: &existing,
            feedback: "국어 비중을 늘려주세요",
        })
        .unwrap();

        assert!(prompt.contains("KoreanCh1"));
    }

    #[test]
    fn conversational_revision_embeds_both_documents() {
        let original = json!({ "2026-08-01": { "1": [] } });
        let modification = json!({ "week": "2", "reason": "복습하고 싶어요" });
        let prompt = build_revision_prompt(&original, &modification);
        assert!(prompt.contains("2026-08-01"));
        assert!(prompt.contains("복습하고 싶어요"));
    }
}
