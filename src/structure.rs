//! Course structure ordering.
//!
//! Sections and lessons carry a 1-based `order` that must always match their position in the
//! owning collection. Every operation here takes shared references and returns new values, so a
//! failed move never leaves a half-applied tree behind.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructureError {
    #[error("index {index} out of bounds for {len} item(s)")]
    InvalidIndex { index: usize, len: usize },
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("source and destination are the same section: {0}")]
    SameSection(String),
    #[error("expected {expected} at index {index} but found {found}")]
    MovingIdMismatch {
        index: usize,
        expected: String,
        found: String,
    },
}

impl StructureError {
    pub fn code(&self) -> &'static str {
        match self {
            StructureError::InvalidIndex { .. } => "invalid_index",
            StructureError::NotFound { .. } => "not_found",
            StructureError::SameSection(_) => "same_section",
            StructureError::MovingIdMismatch { .. } => "moving_id_mismatch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: String,
    pub section_id: String,
    pub title: String,
    pub kind: String,
    pub summary: Option<String>,
    pub duration_minutes: i64,
    pub order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub summary: Option<String>,
    pub order: i64,
    pub lessons: Vec<Lesson>,
}

impl Section {
    pub fn duration_minutes(&self) -> i64 {
        self.lessons.iter().map(|l| l.duration_minutes).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub sections: Vec<Section>,
}

impl Course {
    pub fn duration_minutes(&self) -> i64 {
        self.sections.iter().map(Section::duration_minutes).sum()
    }

    pub fn lesson_count(&self) -> usize {
        self.sections.iter().map(|s| s.lessons.len()).sum()
    }

    fn section_index(&self, section_id: &str) -> Result<usize, StructureError> {
        self.sections
            .iter()
            .position(|s| s.id == section_id)
            .ok_or_else(|| StructureError::NotFound {
                kind: "section",
                id: section_id.to_string(),
            })
    }
}

/// A single drag-and-drop move, addressed by section id plus positions.
///
/// `moving_id` names the section or lesson the caller believes sits at `from_index`. When set,
/// the move is refused unless that entity is still there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureMove {
    Sections {
        from_index: usize,
        to_index: usize,
        moving_id: Option<String>,
    },
    Lessons {
        section_id: String,
        from_index: usize,
        to_index: usize,
        moving_id: Option<String>,
    },
    LessonAcross {
        source_section_id: String,
        dest_section_id: String,
        from_index: usize,
        to_index: usize,
        moving_id: Option<String>,
    },
}

fn check_index(index: usize, len: usize) -> Result<(), StructureError> {
    if index < len {
        Ok(())
    } else {
        Err(StructureError::InvalidIndex { index, len })
    }
}

fn moved<T: Clone>(items: &[T], from_index: usize, to_index: usize) -> Result<Vec<T>, StructureError> {
    check_index(from_index, items.len())?;
    check_index(to_index, items.len())?;
    let mut out = items.to_vec();
    let item = out.remove(from_index);
    out.insert(to_index, item);
    Ok(out)
}

fn check_moving_id<T, F>(
    items: &[T],
    from_index: usize,
    moving_id: Option<&str>,
    id_of: F,
) -> Result<(), StructureError>
where
    F: Fn(&T) -> &str,
{
    let Some(expected) = moving_id else {
        return Ok(());
    };
    check_index(from_index, items.len())?;
    let found = id_of(&items[from_index]);
    if found == expected {
        Ok(())
    } else {
        Err(StructureError::MovingIdMismatch {
            index: from_index,
            expected: expected.to_string(),
            found: found.to_string(),
        })
    }
}

pub fn reindex_sections(sections: &mut [Section]) {
    for (idx, section) in sections.iter_mut().enumerate() {
        section.order = idx as i64 + 1;
    }
}

/// Rewrites lesson order and ownership from the lessons' positions in `section`.
pub fn reindex_lessons(section: &mut Section) {
    for (idx, lesson) in section.lessons.iter_mut().enumerate() {
        lesson.order = idx as i64 + 1;
        lesson.section_id = section.id.clone();
    }
}

pub fn reorder_sections(
    sections: &[Section],
    from_index: usize,
    to_index: usize,
) -> Result<Vec<Section>, StructureError> {
    let mut out = moved(sections, from_index, to_index)?;
    reindex_sections(&mut out);
    Ok(out)
}

pub fn reorder_lessons_within_section(
    section: &Section,
    from_index: usize,
    to_index: usize,
) -> Result<Section, StructureError> {
    let mut out = section.clone();
    out.lessons = moved(&section.lessons, from_index, to_index)?;
    reindex_lessons(&mut out);
    Ok(out)
}

/// Moves one lesson out of `source` into `dest`. `to_index` may equal the destination's
/// length, which appends.
pub fn move_lesson_across_sections(
    source: &Section,
    dest: &Section,
    from_index: usize,
    to_index: usize,
) -> Result<(Section, Section), StructureError> {
    if source.id == dest.id {
        return Err(StructureError::SameSection(source.id.clone()));
    }
    check_index(from_index, source.lessons.len())?;
    check_index(to_index, dest.lessons.len() + 1)?;

    let mut src = source.clone();
    let mut dst = dest.clone();
    let lesson = src.lessons.remove(from_index);
    dst.lessons.insert(to_index, lesson);
    reindex_lessons(&mut src);
    reindex_lessons(&mut dst);
    Ok((src, dst))
}

/// Applies `mv` to a copy of `course`. Section ids and the moving entity are resolved before
/// anything is moved.
pub fn apply_move(course: &Course, mv: &StructureMove) -> Result<Course, StructureError> {
    let mut out = course.clone();
    match mv {
        StructureMove::Sections {
            from_index,
            to_index,
            moving_id,
        } => {
            check_moving_id(&course.sections, *from_index, moving_id.as_deref(), |s| {
                s.id.as_str()
            })?;
            out.sections = reorder_sections(&course.sections, *from_index, *to_index)?;
        }
        StructureMove::Lessons {
            section_id,
            from_index,
            to_index,
            moving_id,
        } => {
            let idx = course.section_index(section_id)?;
            check_moving_id(
                &course.sections[idx].lessons,
                *from_index,
                moving_id.as_deref(),
                |l| l.id.as_str(),
            )?;
            out.sections[idx] =
                reorder_lessons_within_section(&course.sections[idx], *from_index, *to_index)?;
        }
        StructureMove::LessonAcross {
            source_section_id,
            dest_section_id,
            from_index,
            to_index,
            moving_id,
        } => {
            if source_section_id == dest_section_id {
                return Err(StructureError::SameSection(source_section_id.clone()));
            }
            let src_idx = course.section_index(source_section_id)?;
            let dst_idx = course.section_index(dest_section_id)?;
            check_moving_id(
                &course.sections[src_idx].lessons,
                *from_index,
                moving_id.as_deref(),
                |l| l.id.as_str(),
            )?;
            let (src, dst) = move_lesson_across_sections(
                &course.sections[src_idx],
                &course.sections[dst_idx],
                *from_index,
                *to_index,
            )?;
            out.sections[src_idx] = src;
            out.sections[dst_idx] = dst;
        }
    }
    Ok(out)
}

/// Returns the id of the first section or lesson whose order does not match its position.
pub fn find_order_gap(course: &Course) -> Option<&str> {
    for (s_idx, section) in course.sections.iter().enumerate() {
        if section.order != s_idx as i64 + 1 {
            return Some(section.id.as_str());
        }
        for (l_idx, lesson) in section.lessons.iter().enumerate() {
            if lesson.order != l_idx as i64 + 1 || lesson.section_id != section.id {
                return Some(lesson.id.as_str());
            }
        }
    }
    None
}
