use std::path::Path;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequestArgs, ImageUrlArgs,
};
use async_openai::Client;
use base64::Engine;
use serde_json::{json, Value};
use tracing::warn;

use crate::config::{BackendConfig, ResolvedModel};

/// Instructions sent with every frame.
pub(crate) fn vision_caption_prompt() -> String {
    [
        "以下の画像を見て、次の情報を日本語で JSON 形式で出力してください。",
        "- caption: 画像の内容を1文で説明",
        "- tags: 画像の特徴を表す短いタグの配列（例: ['室内', 'おもちゃ', '笑顔']）",
        "- scores: 'cuteness', 'interesting', 'representative' など0〜1のスコア",
        "- has_child: 子どもが写っているか (true/false)",
        "- num_children: 写っている子どもの推定人数",
        "- main_subject: 主な被写体を表す短いラベル",
        "- bbox: 主な被写体の位置 [x_min, y_min, x_max, y_max]（画像サイズで0〜1に正規化、見つからなければ null）",
        "出力は必ず JSON オブジェクトのみとし、余計な文章は一切書かないでください。",
    ]
    .join("\n")
}

/// A chat-completions endpoint with fixed sampling parameters.
pub(crate) struct ChatModel {
    client: Client<OpenAIConfig>,
    model_name: String,
    temperature: f32,
    top_p: f32,
}

impl ChatModel {
    fn new(model: &ResolvedModel, api_base: Option<&str>, api_key: &str) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base) = api_base {
            config = config.with_api_base(base);
        }
        Self {
            client: Client::with_config(config),
            model_name: model.model_name.clone(),
            temperature: model.temperature,
            top_p: model.top_p,
        }
    }

    async fn complete(
        &self,
        content: ChatCompletionRequestUserMessageContent,
        timeout_secs: u64,
    ) -> anyhow::Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .temperature(self.temperature)
            .top_p(self.top_p)
            .messages([ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(content)
                    .build()?,
            )])
            .build()?;

        let response = tokio::time::timeout(
            tokio::time::Duration::from_secs(timeout_secs),
            self.client.chat().create(request),
        )
        .await??;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(anyhow::anyhow!("No content in response from {}", self.model_name))
    }

    async fn describe_image(&self, prompt: &str, image_path: &Path) -> anyhow::Result<String> {
        let content = ChatCompletionRequestUserMessageContent::Array(vec![
            ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartTextArgs::default()
                    .text(prompt)
                    .build()?,
            ),
            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(ImageUrlArgs::default().url(image_data_url(image_path).await?).build()?)
                    .build()?,
            ),
        ]);
        self.complete(content, 300).await
    }

    pub(crate) async fn generate_text(&self, prompt: &str) -> anyhow::Result<String> {
        self.complete(
            ChatCompletionRequestUserMessageContent::Text(prompt.to_owned()),
            120,
        )
        .await
    }
}

/// `data:` URL for an image file. PNG is labelled as such, anything else as
/// JPEG.
pub(crate) async fn image_data_url(path: &Path) -> anyhow::Result<String> {
    use base64::prelude::BASE64_STANDARD;

    let bytes = tokio::fs::read(path).await?;
    let is_png = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
    let mime = if is_png { "image/png" } else { "image/jpeg" };
    Ok(format!("data:{mime};base64,{}", BASE64_STANDARD.encode(bytes)))
}

/// The backend that captions frames.
pub(crate) enum VisionModel {
    Dummy,
    Chat(ChatModel),
}

impl VisionModel {
    pub(crate) fn from_resolved(model: &ResolvedModel) -> Self {
        match &model.backend {
            BackendConfig::Dummy => Self::Dummy,
            BackendConfig::OpenAi { api_base, api_key } => {
                Self::Chat(ChatModel::new(model, api_base.as_deref(), api_key))
            }
        }
    }

    /// The model's raw answer for one frame. Transport failures come back as
    /// the error text so that the frame still gets a (degraded) record.
    pub(crate) async fn describe(&self, prompt: &str, image_path: &Path) -> Value {
        match self {
            Self::Dummy => dummy_vision_result(),
            Self::Chat(chat) => match chat.describe_image(prompt, image_path).await {
                Ok(text) => Value::String(text),
                Err(e) => {
                    warn!(frame = %image_path.display(), "vision call failed: {e:#}");
                    Value::String(format!("vision call failed: {e}"))
                }
            },
        }
    }
}

fn dummy_vision_result() -> Value {
    json!({
        "caption": "ダミー: 子どもが室内で遊んでいる様子です。",
        "tags": ["ダミー", "子ども"],
        "scores": {"cuteness": 0.5, "representative": 0.5},
        "has_child": true,
        "num_children": 1,
        "main_subject": "子ども",
        "bbox": [0.3, 0.3, 0.6, 0.8],
    })
}

/// The backend that writes the diary. `Template` means no model: the diary
/// is built from the captions directly.
pub(crate) enum TextModel {
    Template,
    Chat(ChatModel),
}

impl TextModel {
    pub(crate) fn from_resolved(model: &ResolvedModel) -> Self {
        match &model.backend {
            BackendConfig::Dummy => Self::Template,
            BackendConfig::OpenAi { api_base, api_key } => {
                Self::Chat(ChatModel::new(model, api_base.as_deref(), api_key))
            }
        }
    }
}
