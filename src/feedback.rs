use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::gateway::ChatClient;
use crate::{StudyInfo, FEEDBACK_FALLBACK, FEEDBACK_TONE_RULES};

/// Measured/focused seconds inside one time slot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FocusSlot {
    #[serde(default, rename = "measureTime")]
    pub measure_time: u64,
    #[serde(default, rename = "focusTime")]
    pub focus_time: u64,
}

/// Focus telemetry for one day, keyed by hour-of-day slot labels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FocusPayload {
    #[serde(default, rename = "whenDay")]
    pub when_day: Option<String>,
    #[serde(default, rename = "timeSlots")]
    pub time_slots: BTreeMap<String, FocusSlot>,
}

/// focused/measured as a fraction. Defined as 0 when nothing was measured.
pub fn focus_rate(focus_secs: u64, measure_secs: u64) -> f64 {
    if measure_secs == 0 {
        0.0
    } else {
        focus_secs as f64 / measure_secs as f64
    }
}

#[derive(Debug, Clone)]
pub struct SlotAnalysis {
    pub label: String,
    pub measure_secs: u64,
    pub focus_secs: u64,
    pub rate_pct: f64,
}

#[derive(Debug, Clone, Default)]
pub struct FocusSummary {
    pub total_measure_secs: u64,
    pub total_focus_secs: u64,
    pub overall_pct: f64,
    pub slots: Vec<SlotAnalysis>,
}

/// Aggregate the per-slot telemetry into totals and an overall rate.
pub fn summarize(payload: &FocusPayload) -> FocusSummary {
    let mut summary = FocusSummary::default();
    for (label, slot) in &payload.time_slots {
        summary.total_measure_secs += slot.measure_time;
        summary.total_focus_secs += slot.focus_time;
        summary.slots.push(SlotAnalysis {
            label: label.clone(),
            measure_secs: slot.measure_time,
            focus_secs: slot.focus_time,
            rate_pct: focus_rate(slot.focus_time, slot.measure_time) * 100.0,
        });
    }
    summary.overall_pct =
        focus_rate(summary.total_focus_secs, summary.total_measure_secs) * 100.0;
    summary
}

/// Which direction the model is told to take the feedback, picked from the
/// overall focus percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackBand {
    /// ≥70%: emphasize and praise strongly.
    High,
    /// 40–69%: affirm, encourage incremental improvement.
    Medium,
    /// <40%: reassure, no criticism, invite rest and retry.
    Low,
}

impl FeedbackBand {
    pub fn for_percent(pct: f64) -> Self {
        if pct >= 70.0 {
            FeedbackBand::High
        } else if pct >= 40.0 {
            FeedbackBand::Medium
        } else {
            FeedbackBand::Low
        }
    }

    fn instruction(self) -> &'static str {
        match self {
            FeedbackBand::High => {
                "지시사항: 전체 집중도가 매우 높습니다. 이 점을 특별히 강조하여 학생의 노력을 크게 칭찬하고, 앞으로의 가능성에 대해 긍정적으로 이야기해주세요."
            }
            FeedbackBand::Medium => {
                "지시사항: 준수한 집중도를 보였습니다. 잘한 점을 언급하며, 조금만 더 노력하면 더 높은 성과를 낼 수 있다는 자신감을 심어주는 방향으로 격려해주세요."
            }
            FeedbackBand::Low => {
                "지시사항: 이번에는 집중이 다소 어려웠던 것 같습니다. 결과에 대해 질책하지 말고, 잠시 쉬어가도 괜찮다는 점을 알려주며 다시 도전할 수 있도록 따뜻하게 위로하고 격려해주세요."
            }
        }
    }
}

fn minutes(secs: u64) -> f64 {
    secs as f64 / 60.0
}

/// Assemble the feedback prompt: fixed tone rules, the study context, and
/// when telemetry is present, the analyzed numbers plus a band instruction.
pub fn build_feedback_prompt(study: &StudyInfo, focus: Option<&FocusPayload>) -> String {
    let mut prompt = FEEDBACK_TONE_RULES.to_string();

    let mut study_info = Vec::new();
    if let Some(subject) = &study.subject {
        study_info.push(format!("과목: {subject}"));
    }
    if let Some(topic) = &study.topic {
        study_info.push(format!("주제: {topic}"));
    }
    if let Some(goal) = &study.goal {
        study_info.push(format!("목표: {goal}"));
    }
    if !study_info.is_empty() {
        prompt.push_str(&format!(" 학생의 학습 정보: {}.", study_info.join(", ")));
    }

    if let Some(focus) = focus {
        let summary = summarize(focus);
        let when_day = focus.when_day.as_deref().unwrap_or("오늘");

        prompt.push_str(&format!("\n{when_day}의 집중도 데이터 분석 결과입니다."));
        prompt.push_str(&format!(
            " 총 학습 시간은 {:.1}분이었고, 이 중 {:.1}분 동안 집중했습니다.",
            minutes(summary.total_measure_secs),
            minutes(summary.total_focus_secs),
        ));
        prompt.push_str(&format!(" 전체 집중도는 {:.1}% 입니다.", summary.overall_pct));

        if !summary.slots.is_empty() {
            let descriptions: Vec<String> = summary
                .slots
                .iter()
                .map(|s| {
                    format!(
                        " {}시대에는 {:.1}분 중 {:.1}분 집중({:.1}%)",
                        s.label,
                        minutes(s.measure_secs),
                        minutes(s.focus_secs),
                        s.rate_pct,
                    )
                })
                .collect();
            prompt.push_str(" 시간대별 분석 결과:");
            prompt.push_str(&descriptions.join(","));
            prompt.push('.');
        }

        prompt.push('\n');
        prompt.push_str(FeedbackBand::for_percent(summary.overall_pct).instruction());
    }

    prompt
}

/// Collapse every run of whitespace, embedded newlines included, into a
/// single space. Guarantees the no-newline contract whatever the model did.
pub fn normalize_message(message: &str) -> String {
    message.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Generate the motivational message. Every failure, of any kind, degrades
/// to the fixed apology string because this text goes straight to the
/// student.
pub async fn generate_feedback(
    client: &ChatClient,
    study: &StudyInfo,
    focus: Option<&FocusPayload>,
) -> String {
    let prompt = build_feedback_prompt(study, focus);
    match client.feedback_message(&prompt).await {
        Ok(message) => normalize_message(&message),
        Err(e) => {
            tracing::error!("feedback generation failed: {e}");
            FEEDBACK_FALLBACK.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(slots: &[(&str, u64, u64)]) -> FocusPayload {
        FocusPayload {
            when_day: Some("오늘".to_string()),
            time_slots: slots
                .iter()
                .map(|(label, measure, focus)| {
                    (
                        label.to_string(),
                        FocusSlot {
                            measure_time: *measure,
                            focus_time: *focus,
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn rate_is_zero_when_nothing_measured() {
        assert_eq!(focus_rate(0, 0), 0.0);
        assert_eq!(focus_rate(500, 0), 0.0);
    }

    #[test]
    fn rate_stays_in_unit_interval_for_ordinary_pairs() {
        for (focus, measure) in [(0u64, 1800u64), (600, 1800), (1800, 1800)] {
            let rate = focus_rate(focus, measure);
            assert!((0.0..=1.0).contains(&rate), "rate {rate} out of range");
        }
    }

    #[test]
    fn summary_totals_span_all_slots() {
        let summary = summarize(&payload(&[("16", 1800, 1500), ("21", 600, 300)]));
        assert_eq!(summary.total_measure_secs, 2400);
        assert_eq!(summary.total_focus_secs, 1800);
        assert_eq!(summary.slots.len(), 2);
        assert!((summary.overall_pct - 75.0).abs() < 1e-9);
    }

    #[test]
    fn high_focus_selects_praise_band() {
        // 1500/1800 = 83.3%
        let summary = summarize(&payload(&[("16", 1800, 1500)]));
        assert!((summary.overall_pct - 83.333).abs() < 0.01);
        assert_eq!(
            FeedbackBand::for_percent(summary.overall_pct),
            FeedbackBand::High
        );
    }

    #[test]
    fn low_focus_selects_reassure_band() {
        // 600/1800 = 33.3%
        let summary = summarize(&payload(&[("21", 1800, 600)]));
        assert!((summary.overall_pct - 33.333).abs() < 0.01);
        assert_eq!(
            FeedbackBand::for_percent(summary.overall_pct),
            FeedbackBand::Low
        );
    }

    #[test]
    fn band_boundaries_are_inclusive() {
        assert_eq!(FeedbackBand::for_percent(70.0), FeedbackBand::High);
        assert_eq!(FeedbackBand::for_percent(69.9), FeedbackBand::Medium);
        assert_eq!(FeedbackBand::for_percent(40.0), FeedbackBand::Medium);
        assert_eq!(FeedbackBand::for_percent(39.9), FeedbackBand::Low);
    }

    #[test]
    fn prompt_embeds_analysis_and_band_instruction() {
        let study = StudyInfo {
            subject: Some("과학".to_string()),
            topic: Some("광합성".to_string()),
            goal: None,
        };
        let focus = payload(&[("16", 1800, 1500)]);
        let prompt = build_feedback_prompt(&study, Some(&focus));

        assert!(prompt.contains("과목: 과학"));
        assert!(prompt.contains("83.3%"));
        assert!(prompt.contains("크게 칭찬"));
    }

    #[test]
    fn prompt_without_focus_has_no_band_instruction() {
        let prompt = build_feedback_prompt(&StudyInfo::default(), None);
        assert!(!prompt.contains("지시사항:"));
    }

    #[test]
    fn normalize_strips_every_newline() {
        let raw = "잘했어요.\n내일도\n\n화이팅   하세요.\r\n끝.";
        let normalized = normalize_message(raw);
        assert!(!normalized.contains('\n'));
        assert!(!normalized.contains('\r'));
        assert_eq!(normalized, "잘했어요. 내일도 화이팅 하세요. 끝.");
    }
}
