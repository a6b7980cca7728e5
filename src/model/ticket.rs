use std::fmt::{Display, Formatter};

use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::DecodeError;
use crate::util::buf_ext::{BufExt, BufMutExt};


/// A ticket record as it is stored in the collection and shipped inside requests and responses.
///  Validation of the individual fields is the business of the commands, the record itself
///  accepts any values.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
    pub id: i32,
    pub name: String,
    pub coordinates: Coordinates,
    /// millis since epoch, assigned by the collection when the ticket is added
    pub creation_date: u64,
    pub price: f32,
    pub kind: TicketKind,
    pub person: Option<Person>,
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub x: f32,
    pub y: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub height: f32,
    pub weight: i32,
    pub passport_id: Option<String>,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Location {
    pub x: i64,
    pub y: i64,
    pub z: i32,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum TicketKind {
    Vip = 1,
    Usual = 2,
    Budgetary = 3,
    Cheap = 4,
}

impl TicketKind {
    pub fn parse(s: &str) -> Option<TicketKind> {
        match s.to_ascii_uppercase().as_str() {
            "VIP" => Some(TicketKind::Vip),
            "USUAL" => Some(TicketKind::Usual),
            "BUDGETARY" => Some(TicketKind::Budgetary),
            "CHEAP" => Some(TicketKind::Cheap),
            _ => None,
        }
    }
}

impl Ticket {
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_i32(self.id);
        buf.put_string(&self.name);
        buf.put_f32(self.coordinates.x);
        buf.put_i64(self.coordinates.y);
        buf.put_u64(self.creation_date);
        buf.put_f32(self.price);
        buf.put_u8(self.kind.into());
        buf.put_option(self.person.as_ref(), |buf, p| p.ser(buf));
        buf.put_option(self.owner.as_ref(), |buf, o| buf.put_string(o));
    }

    pub fn try_deser(buf: &mut impl Buf) -> Result<Ticket, DecodeError> {
        let id = buf.try_get_i32()?;
        let name = buf.try_get_string()?;
        let coordinates = Coordinates {
            x: buf.try_get_f32()?,
            y: buf.try_get_i64()?,
        };
        let creation_date = buf.try_get_u64()?;
        let price = buf.try_get_f32()?;
        let raw_kind = buf.try_get_u8()?;
        let kind = TicketKind::try_from_primitive(raw_kind)
            .map_err(|_| DecodeError::InvalidDiscriminator { what: "ticket kind", value: raw_kind })?;
        let person = buf.try_get_option(|b| Person::try_deser(b))?;
        let owner = buf.try_get_option(|b| b.try_get_string())?;

        Ok(Ticket {
            id,
            name,
            coordinates,
            creation_date,
            price,
            kind,
            person,
            owner,
        })
    }

    pub fn ser_list(tickets: &[Ticket], buf: &mut impl BufMut) {
        buf.put_len(tickets.len());
        for t in tickets {
            t.ser(buf);
        }
    }

    pub fn try_deser_list(buf: &mut impl Buf) -> Result<Vec<Ticket>, DecodeError> {
        let len = buf.try_get_len()?;
        let mut result = Vec::with_capacity(len);
        for _ in 0..len {
            result.push(Ticket::try_deser(buf)?);
        }
        Ok(result)
    }
}

impl Person {
    fn ser(&self, buf: &mut impl BufMut) {
        buf.put_f32(self.height);
        buf.put_i32(self.weight);
        buf.put_option(self.passport_id.as_ref(), |buf, s| buf.put_string(s));
        buf.put_option(self.location.as_ref(), |buf, l| {
            buf.put_i64(l.x);
            buf.put_i64(l.y);
            buf.put_i32(l.z);
        });
    }

    fn try_deser(buf: &mut impl Buf) -> Result<Person, DecodeError> {
        Ok(Person {
            height: buf.try_get_f32()?,
            weight: buf.try_get_i32()?,
            passport_id: buf.try_get_option(|b| b.try_get_string())?,
            location: buf.try_get_option(|b| Ok(Location {
                x: b.try_get_i64()?,
                y: b.try_get_i64()?,
                z: b.try_get_i32()?,
            }))?,
        })
    }
}

impl Display for Ticket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ticket{{id={}, name='{}', coordinates=({}, {}), creationDate={}, price={}, type={:?}",
               self.id, self.name, self.coordinates.x, self.coordinates.y, self.creation_date, self.price, self.kind)?;
        if let Some(person) = &self.person {
            write!(f, ", person=Person{{height={}, weight={}, passportID={:?}",
                   person.height, person.weight, person.passport_id)?;
            if let Some(l) = &person.location {
                write!(f, ", location=({}, {}, {})", l.x, l.y, l.z)?;
            }
            write!(f, "}}")?;
        }
        if let Some(owner) = &self.owner {
            write!(f, ", owner={}", owner)?;
        }
        write!(f, "}}")
    }
}
