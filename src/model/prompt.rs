//! Prompt text for event collection and detail generation.
//!
//! The collector prompt asks for one `{事件名称（YYYY年）}` marker per line,
//! which is exactly what the braced extraction grammar reads back. The
//! detail prompt asks for a JSON object matching [`DetailRecord`].
//!
//! [`DetailRecord`]: crate::vault::render::DetailRecord

use crate::extract::ExtractedEvent;

/// System prompt used when a caller does not supply one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "你是一位专业的历史学者，提供客观、准确、详细的历史事件信息。\
     回答要简明扼要，不要添加无关的评论。";

/// System prompt for listing events inside a year window.
pub fn timeline_system_prompt() -> &'static str {
    "你是一位专业的历史学者，提供客观、准确、详细的历史事件信息。\n\
     请列出指定时间范围内的重要历史事件，每行一个，格式必须是：\n\
     {事件名称（xxxx年）}\n\n\
     示例：\n\
     {甲午战争爆发（1894年）}\n\
     {《马关条约》签订（1895年）}\n\n\
     要求：\n\
     1. 只使用 {事件名称（xxxx年）} 格式，不输出任何其他内容\n\
     2. 所有事件都必须落在指定时间范围内\n\
     3. 只列出有明确年份的重要事件\n\
     4. 事件要足够细致，不要遗漏重要事件\n\
     5. 不要添加编号、序号或其他前缀\n\
     6. 不要列出未经证实的事件或模糊的时间点"
}

/// User prompt for listing events about `event_name` within `range_label`.
pub fn timeline_prompt(event_name: &str, range_label: &str) -> String {
    format!(
        "请列出在{range_label}年间与\"{event_name}\"相关的所有重要历史事件。\n\
         每个事件都必须带有明确的年份，并严格使用 {{事件名称（xxxx年）}} 格式。\n\
         不要添加编号、解释或其他内容。"
    )
}

/// System prompt for structured detail generation.
pub fn detail_system_prompt() -> &'static str {
    "你是一位精通中国史与世界史的历史学者，负责提供客观、准确、详细的历史事件信息。\n\
     请只输出一个 JSON 对象，格式如下：\n\n\
     ```json\n\
     {\n\
         \"title\": \"事件标题\",\n\
         \"happened\": \"发生时间（尽量精确到年月日）\",\n\
         \"people\": \"相关人物（多个用逗号分隔）\",\n\
         \"location\": \"发生地点（尽量详细）\",\n\
         \"tags\": \"相关标签（多个用逗号分隔）\",\n\
         \"overview\": \"概述\",\n\
         \"background\": \"起因与背景\",\n\
         \"course\": \"经过与发展\",\n\
         \"outcome\": \"结果与影响\",\n\
         \"significance\": \"历史意义\"\n\
     }\n\
     ```\n\n\
     要求：\n\
     1. 严格遵循上述 JSON 结构，键名保持不变\n\
     2. 内容客观准确，不做主观评论\n\
     3. 信息尽量丰富细致\n\
     4. 输出的 JSON 必须可以被直接解析"
}

/// User prompt asking for the details of one extracted event.
pub fn detail_prompt(event: &ExtractedEvent) -> String {
    format!(
        "请提供以下历史事件的详细信息：\n\
         事件名称：{}\n\
         发生年份：{}\n\n\
         请按照系统提示中的 JSON 格式输出，包含发生时间、相关人物、地点、标签以及五个分节内容。\n\
         JSON 必须严格正确，键名不可改变。",
        event.canonical_name,
        event.timing.label()
    )
}
