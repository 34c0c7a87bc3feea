//! Prompt Builder — pure, deterministic assembly of the remark-writing prompt.
//!
//! The rationale prompt lives here too so that both prompts change together.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize};

/// Target performance descriptor controlling generation verbosity and tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Level {
    #[serde(rename = "상")]
    High,
    #[serde(rename = "중상")]
    UpperMiddle,
    #[default]
    #[serde(rename = "중")]
    Middle,
    #[serde(rename = "중하")]
    LowerMiddle,
    #[serde(rename = "하")]
    Low,
}

impl Level {
    pub fn label(self) -> &'static str {
        match self {
            Level::High => "상",
            Level::UpperMiddle => "중상",
            Level::Middle => "중",
            Level::LowerMiddle => "중하",
            Level::Low => "하",
        }
    }

    /// Length and depth instruction for this level.
    pub fn instruction(self) -> &'static str {
        match self {
            Level::High | Level::UpperMiddle => {
                "학생의 역량과 활동의 우수성이 잘 드러나 보도록 매우 구체적인 사례와 함께 깊이 있게 서술해주세요. 분량은 400자에서 500자 내외로 작성해주세요."
            }
            Level::Middle => {
                "활동에 대한 사실을 객관적으로 기록하고, 그에 대한 사실적인 평가가 드러나도록 서술해주세요. 분량은 200자에서 300자 내외로 작성해주세요."
            }
            Level::LowerMiddle | Level::Low => {
                "활동에 참여했다는 사실을 중심으로 단순하고 간결하게 기록해주세요. 분량은 100자에서 200자 내외로 작성해주세요."
            }
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Record-type category (특기사항 종류).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecordCategory {
    #[default]
    #[serde(rename = "교과세특")]
    Subject,
    #[serde(rename = "자율활동")]
    Autonomous,
    #[serde(rename = "동아리활동")]
    Club,
    #[serde(rename = "진로활동")]
    Career,
    #[serde(rename = "행동발달특성")]
    Behavior,
}

impl RecordCategory {
    pub const ALL: [RecordCategory; 5] = [
        RecordCategory::Subject,
        RecordCategory::Autonomous,
        RecordCategory::Club,
        RecordCategory::Career,
        RecordCategory::Behavior,
    ];

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == label)
    }

    pub fn label(self) -> &'static str {
        match self {
            RecordCategory::Subject => "교과세특",
            RecordCategory::Autonomous => "자율활동",
            RecordCategory::Club => "동아리활동",
            RecordCategory::Career => "진로활동",
            RecordCategory::Behavior => "행동발달특성",
        }
    }

    /// Fixed definitional sentence injected into the prompt.
    pub fn definition(self) -> &'static str {
        match self {
            RecordCategory::Subject => {
                "학생참여형 수업 및 수업과 연계된 수행평가 등에서 관찰한 내용을 입력함."
            }
            RecordCategory::Autonomous => {
                "임원 활동, 학교 행사 참여, 학교 프로그램 이수 등 학교생활 충실도를 평가합니다."
            }
            RecordCategory::Club => {
                "자율동아리는 반영되지 않으며, 정규 창체 동아리에서의 활동 내용, 역할, 고민 등을 구체적으로 기록합니다."
            }
            RecordCategory::Career => {
                "희망 분야 관련 보고서, 직업 체험, 전문가 초청 프로그램 참여 경험 등을 기록하며, 학습 내용을 현재 관심사와 연결하려는 노력이 중요합니다."
            }
            RecordCategory::Behavior => {
                "학생의 전반적인 인성, 자기주도성, 학교생활에서의 태도 변화, 성장 과정 등을 종합적으로 평가하여 기록합니다."
            }
        }
    }

    /// Only subject remarks name the subject.
    pub fn uses_subject(self) -> bool {
        matches!(self, RecordCategory::Subject)
    }
}

impl fmt::Display for RecordCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub const DEFAULT_SUBJECT: &str = "국어";

fn default_subject() -> String {
    DEFAULT_SUBJECT.to_string()
}

/// Blank or null category falls back to the default; unknown labels are errors.
fn category_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<RecordCategory, D::Error> {
    match Option::<String>::deserialize(d)?.as_deref().map(str::trim) {
        None | Some("") => Ok(RecordCategory::default()),
        Some(label) => RecordCategory::from_label(label)
            .ok_or_else(|| de::Error::custom(format!("unknown record type: {label}"))),
    }
}

fn subject_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(default_subject))
}

fn string_or_empty<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

/// Contextual configuration shared by every record of a batch.
///
/// Serialized with the same camelCase keys as the saved form state, so the
/// persisted JSON and the API payload are interchangeable. Absent fields fall
/// back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptContext {
    #[serde(deserialize_with = "category_or_default")]
    pub record_type: RecordCategory,
    #[serde(deserialize_with = "subject_or_default")]
    pub subject: String,
    #[serde(deserialize_with = "string_or_empty")]
    pub curriculum_info: String,
    #[serde(deserialize_with = "string_or_empty")]
    pub class_activity_info: String,
    #[serde(deserialize_with = "string_or_empty")]
    pub guidelines: String,
    #[serde(deserialize_with = "string_or_empty")]
    pub start_phrase: String,
}

impl Default for PromptContext {
    fn default() -> Self {
        Self {
            record_type: RecordCategory::default(),
            subject: default_subject(),
            curriculum_info: String::new(),
            class_activity_info: String::new(),
            guidelines: String::new(),
            start_phrase: String::new(),
        }
    }
}

const STYLE_GUIDE: &str = "\
## 3. 출력 형식 및 스타일 가이드
- **시작 문구:** \"{start_phrase}\" (만약 시작 문구가 있다면 반드시 이 문구로 시작해주세요. 없다면 자율적으로 시작해주세요.)
- **결과물 형식:** 최종 결과물에는 수행 수준('상', '중', '하' 등), 넘버링, 제목, 구분선 등 어떤 부가 정보도 포함하지 마세요. 오직 특기사항 내용 본문만 출력해야 합니다.
- **어조 및 문체:** 품격 있고 신뢰감을 주는 전문가적 어조를 사용하세요.
- **문장 종결 어미:** 모든 문장은 '~임.', '~음.', '~함.'으로 끝내주세요.
- **금지 단어:** '학생', '그는', '그가', '그의'와 같은 3인칭 대명사를 사용하지 마세요.
- **긍정적 서술:** 제출된 활동 내용에서 긍정적인 역량을 부각하여 구체적으로 서술해주세요.
- **부정적 서술 변환:** 만약 부정적인 키워드가 있다면, 그대로 사용하지 말고 긍정적 성장 가능성으로 변환하여 서술해주세요. (예: '인내심 부족' -> '꾸준한 자기 성찰을 통해 더 많은 여유를 갖춘다면 크게 성장할 것으로 기대됨.')
- **언어:** 모든 영어는 한국어로 번역해주세요.
- **줄바꿈:** 문단 전체는 줄바꿈 없이 한 줄로 이어지게 작성해주세요.";

const EXAMPLES: &str = "\
## 4. 참고 예시 및 키워드
- **예시1:** 문학작품 감상 기반 통합적 적용 탐구활동으로 도파민 추구 현상에 관심을 갖고 '트렌드 코리아 2024(김난도 외)'에서 관련 부분을 찾아 읽고 도파민 추구 현상을 적절하게 활용한다면 지루하다고 여기는 과업들을 수행할 때 더 큰 성취감과 보상, 흥미를 느낄 수 있다는 가설을 세우고 보고서를 작성함.
- **예시2:** '동물실험은 허용되어야 한다'라는 논제로 진행된 토론에서 찬성측 입장으로서 우수한 논리력과 설득력을 발휘함. 주제에 대한 깊이 있는 이해와 철저한 준비가 돋보였으며, 토론의 핵심 쟁점을 명확히 파악하고 논리적으로 정리함.
- **활용 가능 키워드:** 탐구함, 성찰함, 능숙함, 생각이 깊음, 분석적 사고력, 자신있게 이야기함, 뛰어남, 탁월함, 발휘함, 인상적임, 분석함, 확장함, 추론함, 토론함, 우수함, 돋보임, 발표함, 설명함, 이끌어냄, 제시함, 다양한 배경지식, 논리적, 창의적, 비판적 사고, 인문학적 성찰, 논리정연.";

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    if value.is_empty() {
        placeholder
    } else {
        value
    }
}

/// Builds the remark-writing prompt for one record.
///
/// Same inputs always yield the same bytes; there is no hidden state.
pub fn build_prompt(content: &str, level: Level, context: &PromptContext) -> String {
    let category = context.record_type;
    let mut lines: Vec<String> = vec![
        "# 지시사항: 학생 활동 기록문을 바탕으로 지정된 조건에 맞춰 특기사항을 작성해주세요."
            .to_string(),
        String::new(),
        "## 1. 작성 맥락".to_string(),
        format!("- 특기사항 종류: {category}"),
        format!("- 영역 정의: {}", category.definition()),
    ];
    if category.uses_subject() {
        lines.push(format!("- 과목: {}", context.subject));
    }
    lines.push(format!(
        "- 관련 교육과정: {}",
        or_placeholder(&context.curriculum_info, "미지정")
    ));
    lines.push(format!(
        "- 수업(활동) 내용: {}",
        or_placeholder(&context.class_activity_info, "미지정")
    ));
    lines.push(String::new());
    lines.push("## 2. 생성 조건".to_string());
    lines.push(format!("- 학생 수행 수준: {level} ({})", level.instruction()));
    lines.push(format!(
        "- 사용자 추가 지침: {}",
        or_placeholder(&context.guidelines, "없음")
    ));
    lines.push(String::new());
    lines.push(STYLE_GUIDE.replace("{start_phrase}", context.start_phrase.trim()));
    lines.push(String::new());
    lines.push(EXAMPLES.to_string());
    lines.push(String::new());
    lines.push("---".to_string());
    lines.push("## 5. 학생 활동 기록문 (이 내용을 바탕으로 작성):".to_string());
    lines.push(content.to_string());

    lines.join("\n")
}

/// Builds the prompt asking the model to explain which parts of the original
/// activity text a generated remark was based on.
pub fn build_reasoning_prompt(original_content: &str, content: &str) -> String {
    [
        "아래의 '원본 학생 활동 내용'을 바탕으로 생성된 '특기사항 결과'가 어떤 근거로 작성되었는지 설명해주세요.",
        "- 원본 내용의 어떤 구절이나 키워드를 참조했는지 구체적으로 언급해주세요.",
        "- 분석적이고 전문적인 톤으로 설명해주세요.",
        "",
        "---",
        "[원본 학생 활동 내용]",
        original_content,
        "",
        "---",
        "[특기사항 결과]",
        content,
        "---",
    ]
    .join("\n")
}
