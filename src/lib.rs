use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod auth;
pub mod catalog;
pub mod error;
pub mod feedback;
pub mod gateway;
pub mod planner;

/// One registered subject on a student account: which workbook they own and
/// how far they have gotten in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    pub publish: String,
    pub workbook: String,
    pub scope: String,
}

/// Study context attached to a feedback request. All fields optional; only
/// the ones present are woven into the prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudyInfo {
    pub subject: Option<String>,
    pub topic: Option<String>,
    pub goal: Option<String>,
}

/// Shared, read-only per-process state. The catalog and clients are built
/// once at startup and handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub catalog: Arc<catalog::Catalog>,
    pub chat: Arc<gateway::ChatClient>,
    pub auth: Arc<auth::AuthService>,
}

pub const SCHEDULE_SYSTEM_PROMPT: &str =
    "당신은 학생 데이터와 제공된 참고 자료를 바탕으로 최적의 학습 스케줄을 JSON 형식으로 생성하는 AI입니다. 다른 설명 없이 JSON 객체만 반환하세요.";

pub const REVISE_SYSTEM_PROMPT: &str =
    "당신은 기존 스케줄을 사용자의 요청에 맞게 유연하게 수정하고 완전한 JSON 결과물만 반환하는 AI입니다.";

pub const FEEDBACK_SYSTEM_PROMPT: &str =
    "당신은 학생의 학습 데이터를 분석하고 지시사항에 따라 격려해주는 따뜻한 스터디 코치입니다. 모든 응답은 한 줄의 완결된 문장으로 자연스럽게 이어지게 작성해주세요.";

/// Fixed tone constraints for every feedback prompt. The no-newline rule is
/// additionally enforced after the fact by `feedback::normalize_message`.
pub const FEEDBACK_TONE_RULES: &str = "\
학생의 공부 상태 데이터를 바탕으로 학생을 격려하고 동기를 부여하는 따뜻한 메시지를 한국어로 작성해주세요.
반드시 다음 사항을 지켜주세요:
1. 줄바꿈 문자(\\n)를 절대 사용하지 마세요. 문장은 마침표(.)로 끝내고 한 줄로 이어서 작성하세요.
2. 이모티콘을 사용하지 마세요.
3. \"AI\", \"저\", \"제가\"와 같이 자신을 지칭하는 말을 사용하지 마세요.
4. 학생의 이름 대신 \"학생\" 또는 \"여러분\"과 같은 호칭을 사용하세요.
5. 학생의 의지를 북돋우고, 자존감을 세워줄 수 있는 긍정적인 피드백을 주세요.
6. 제공된 데이터를 자연스럽게 문장에 녹여서 설명해주세요.";

/// Shown to the student whenever the feedback call fails for any reason.
pub const FEEDBACK_FALLBACK: &str =
    "AI 코치를 호출하는 중에 문제가 발생했어요. 잠시 후 다시 시도해주세요.";
