use actix_multipart::{Field, Multipart};
use actix_web::{web, Either, HttpResponse, Responder};
use futures_util::StreamExt;
use std::collections::HashMap;

use crate::db::StoreError;
use crate::models::{
    parse_age, parse_member_id, Member, NewMember, UpdateMemberRequest, ValidationError,
};
use crate::uploads::{UploadError, AVATAR_FIELD};
use crate::AppState;

const MAX_TEXT_FIELD_BYTES: usize = 16 * 1024;

/// Text fields and the stored avatar name collected from a create form
struct MemberForm {
    name: Option<String>,
    age: Option<String>,
    avatar: String,
}

impl MemberForm {
    fn into_new_member(self) -> Result<NewMember, ValidationError> {
        let age = parse_age(self.age.as_deref().unwrap_or(""));
        let new_member = NewMember {
            name: self.name.unwrap_or_default(),
            age: age.as_ref().copied().unwrap_or_default(),
            avatar: self.avatar,
        };
        match (new_member.validate(), age) {
            (Ok(()), Ok(_)) => Ok(new_member),
            (Err(mut e), Err(age_err)) => {
                e.problems.extend(age_err.problems);
                Err(e)
            }
            (Err(e), Ok(_)) | (Ok(()), Err(e)) => Err(e),
        }
    }
}

/// Resolve the `{id}` path segment to a stored member.
///
/// Malformed ids are rejected without touching the store.
fn resolve_member(data: &AppState, raw_id: &str) -> Result<Member, HttpResponse> {
    let Some(id) = parse_member_id(raw_id) else {
        return Err(HttpResponse::BadRequest().json(serde_json::json!({
            "error": "Invalid ID"
        })));
    };

    match data.db.get_member(id) {
        Ok(Some(member)) => Ok(member),
        Ok(None) => Err(HttpResponse::NotFound().json(serde_json::json!({
            "error": "Member not found"
        }))),
        Err(e) => {
            log::error!("Failed to look up member {}: {}", id, e);
            Err(HttpResponse::InternalServerError().json(serde_json::json!({
                "error": e.to_string()
            })))
        }
    }
}

/// List all members
async fn list_members(data: web::Data<AppState>) -> impl Responder {
    match data.db.list_members() {
        Ok(members) => HttpResponse::Ok().json(members),
        Err(e) => {
            log::error!("Failed to list members: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": e.to_string()
            }))
        }
    }
}

/// Get a single member
async fn get_member(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match resolve_member(&data, &path) {
        Ok(member) => HttpResponse::Ok().json(member),
        Err(resp) => resp,
    }
}

/// Create a member from a multipart form carrying `name`, `age` and the
/// avatar file
async fn create_member(data: web::Data<AppState>, payload: Multipart) -> impl Responder {
    let form = match read_member_form(&data, payload).await {
        Ok(form) => form,
        Err(e) => {
            log::error!("Failed to read member form: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": e.to_string()
            }));
        }
    };

    let avatar = form.avatar.clone();
    let created = form
        .into_new_member()
        .map_err(StoreError::from)
        .and_then(|new_member| data.db.create_member(&new_member));

    match created {
        Ok(member) => {
            log::info!("Created member {} with avatar {}", member.id, member.avatar);
            HttpResponse::Created().json(member)
        }
        Err(e) => {
            log::error!("Failed to create member: {}", e);
            discard_avatar(&data, &avatar).await;
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": e.to_string()
            }))
        }
    }
}

/// Update a member's name and/or age from a JSON or urlencoded body.
///
/// The body is taken loosely typed so values that cannot be cast to a
/// member field fail validation instead of extraction.
async fn update_member(
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: Either<web::Json<serde_json::Value>, web::Form<HashMap<String, String>>>,
) -> impl Responder {
    let member = match resolve_member(&data, &path) {
        Ok(member) => member,
        Err(resp) => return resp,
    };

    let request = match body {
        Either::Left(json) => UpdateMemberRequest::from_json(&json),
        Either::Right(form) => UpdateMemberRequest::from_form(&form),
    };
    let updated = request
        .map_err(StoreError::from)
        .and_then(|request| data.db.update_member(member.id, &request));

    // `None` means the row vanished after resolution; answered as JSON null
    match updated {
        Ok(updated) => HttpResponse::Ok().json(updated),
        Err(e) => {
            log::error!("Failed to update member {}: {}", member.id, e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": e.to_string()
            }))
        }
    }
}

/// Delete a member and schedule removal of its avatar
async fn delete_member(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let member = match resolve_member(&data, &path) {
        Ok(member) => member,
        Err(resp) => return resp,
    };

    match data.db.delete_member(member.id) {
        Ok(Some(deleted)) => {
            schedule_avatar_removal(&data, deleted.avatar.clone());
            HttpResponse::Ok().json(deleted)
        }
        Ok(None) => {
            log::error!("Member {} disappeared before it could be deleted", member.id);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("Member {} could not be deleted", member.id)
            }))
        }
        Err(e) => {
            log::error!("Failed to delete member {}: {}", member.id, e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": e.to_string()
            }))
        }
    }
}

/// Walk the multipart stream, storing the avatar file and collecting the
/// text fields. Any avatar already written is removed if the form turns out
/// to be unusable.
async fn read_member_form(
    data: &AppState,
    mut payload: Multipart,
) -> Result<MemberForm, UploadError> {
    let mut name = None;
    let mut age = None;
    let mut avatar: Option<String> = None;

    let walked = async {
        while let Some(item) = payload.next().await {
            let field = item.map_err(|e| UploadError::Multipart(e.to_string()))?;
            let disposition = field.content_disposition();
            let field_name = disposition.get_name().unwrap_or_default().to_string();
            let filename = disposition.get_filename().map(str::to_string);

            match filename {
                // Browsers send an empty file part when nothing was selected
                Some(filename) if filename.is_empty() => drain_field(field).await?,
                Some(filename) => {
                    if field_name != AVATAR_FIELD || avatar.is_some() {
                        return Err(UploadError::UnexpectedField(field_name));
                    }
                    let stored = data
                        .avatars
                        .save(&field_name, Some(filename.as_str()), field)
                        .await?;
                    avatar = Some(stored);
                }
                None => {
                    let value = read_text_field(field, &field_name).await?;
                    match field_name.as_str() {
                        "name" => name = Some(value),
                        "age" => age = Some(value),
                        other => log::debug!("Ignoring form field {}", other),
                    }
                }
            }
        }
        Ok::<(), UploadError>(())
    }
    .await;

    match (walked, avatar) {
        (Ok(()), Some(avatar)) => Ok(MemberForm { name, age, avatar }),
        (Ok(()), None) => Err(UploadError::MissingFile),
        (Err(e), Some(avatar)) => {
            discard_avatar(data, &avatar).await;
            Err(e)
        }
        (Err(e), None) => Err(e),
    }
}

async fn read_text_field(mut field: Field, field_name: &str) -> Result<String, UploadError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| UploadError::Multipart(e.to_string()))?;
        if buf.len() + chunk.len() > MAX_TEXT_FIELD_BYTES {
            return Err(UploadError::FieldTooLong(field_name.to_string()));
        }
        buf.extend_from_slice(&chunk);
    }
    String::from_utf8(buf)
        .map_err(|_| UploadError::Multipart(format!("field {} is not valid UTF-8", field_name)))
}

async fn drain_field(mut field: Field) -> Result<(), UploadError> {
    while let Some(chunk) = field.next().await {
        chunk.map_err(|e| UploadError::Multipart(e.to_string()))?;
    }
    Ok(())
}

/// Remove an avatar whose member was never stored
async fn discard_avatar(data: &AppState, avatar: &str) {
    match data.avatars.remove(avatar).await {
        Ok(()) => log::info!("Removed orphaned avatar {}", avatar),
        Err(e) => log::error!("Failed to remove orphaned avatar {}: {}", avatar, e),
    }
}

fn schedule_avatar_removal(data: &AppState, avatar: String) {
    let avatars = data.avatars.clone();
    data.background.spawn(async move {
        match avatars.remove(&avatar).await {
            Ok(()) => log::info!("Deleted avatar {}", avatar),
            Err(e) => log::error!("Error deleting avatar {}: {}", avatar, e),
        }
    });
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/members")
            .route("", web::get().to(list_members))
            .route("", web::post().to(create_member))
            .route("/{id}", web::get().to(get_member))
            .route("/{id}", web::put().to(update_member))
            .route("/{id}", web::delete().to(delete_member)),
    );
}
