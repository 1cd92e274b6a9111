use crate::{
    error::{Error, Result},
    inputs::{InputRef, InputResolver},
};

/// Calcula `nr_reduces` para un job.
///
/// 1. con map: `partitions` (que ya llega como "`partitions` o 1");
/// 2. sin map y con entradas particionadas: `1 + max(id)` sobre los índices de *todas* las entradas;
/// 3. sin map y sin particiones: 1.
///
/// `merge_partitions` se aplica al final y colapsa todo a 1.
pub fn nr_reduces(
    has_map: bool,
    input: &[InputRef],
    partitions: u32,
    merge_partitions: bool,
    resolver: &dyn InputResolver,
) -> Result<u32> {
    let nr = if has_map {
        partitions.max(1)
    } else if resolver.is_partitioned(input) {
        max_partition_id(input, resolver)?
            .map(|max| {
                max.checked_add(1)
                    .ok_or_else(|| Error::invalid("nr_reduces", "id de partición fuera de rango"))
            })
            .transpose()?
            .unwrap_or(1)
    } else {
        1
    };

    if merge_partitions {
        return Ok(1);
    }
    Ok(nr)
}

/// Máximo id de partición entre todas las entradas y sus réplicas.
/// Si dos entradas no coinciden, gana la mayor.
fn max_partition_id(input: &[InputRef], resolver: &dyn InputResolver) -> Result<Option<u32>> {
    let mut max: Option<u32> = None;
    for entry in input {
        for dir in entry.urls() {
            for (id, _url) in resolver.read_index(dir)? {
                max = Some(max.map_or(id, |m| m.max(id)));
            }
        }
    }
    Ok(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::{
        tests::{temp_dir, write_index},
        LocalInputs,
    };

    fn unpartitioned() -> Vec<InputRef> {
        vec![InputRef::from("raw://hola"), InputRef::from("file:///tmp/x")]
    }

    #[test]
    fn con_map_usa_partitions() {
        let r = LocalInputs::new("data");
        assert_eq!(nr_reduces(true, &unpartitioned(), 4, false, &r).unwrap(), 4);
        assert_eq!(nr_reduces(true, &unpartitioned(), 0, false, &r).unwrap(), 1);
    }

    #[test]
    fn sin_map_particionado_usa_max_id_mas_uno() {
        let tmp = temp_dir("nr_partitioned");
        let dir = write_index(&tmp, "idx", &[(0, "u0"), (1, "u1"), (2, "u2")]);
        let r = LocalInputs::new(&tmp);
        assert_eq!(nr_reduces(false, &[dir.as_str().into()], 1, false, &r).unwrap(), 3);
    }

    #[test]
    fn sin_map_recorre_todas_las_entradas() {
        let tmp = temp_dir("nr_all_inputs");
        let a = write_index(&tmp, "a", &[(0, "u0"), (1, "u1")]);
        let b = write_index(&tmp, "b", &[(5, "u5"), (0, "v0")]);
        let r = LocalInputs::new(&tmp);
        let input = vec![a.as_str().into(), b.as_str().into()];
        assert_eq!(nr_reduces(false, &input, 1, false, &r).unwrap(), 6);
    }

    #[test]
    fn sin_map_ni_particiones_da_uno() {
        let r = LocalInputs::new("data");
        assert_eq!(nr_reduces(false, &unpartitioned(), 8, false, &r).unwrap(), 1);
        assert_eq!(nr_reduces(false, &[], 8, false, &r).unwrap(), 1);
    }

    #[test]
    fn merge_partitions_colapsa_siempre_a_uno() {
        let tmp = temp_dir("nr_merge");
        let dir = write_index(&tmp, "idx", &[(0, "u0"), (7, "u7")]);
        let r = LocalInputs::new(&tmp);
        assert_eq!(nr_reduces(true, &unpartitioned(), 4, true, &r).unwrap(), 1);
        assert_eq!(nr_reduces(false, &[dir.as_str().into()], 1, true, &r).unwrap(), 1);
        assert_eq!(nr_reduces(false, &unpartitioned(), 1, true, &r).unwrap(), 1);
    }

    #[test]
    fn indice_vacio_no_baja_de_uno() {
        let tmp = temp_dir("nr_empty");
        let dir = write_index(&tmp, "idx", &[]);
        let r = LocalInputs::new(&tmp);
        assert_eq!(nr_reduces(false, &[dir.as_str().into()], 1, false, &r).unwrap(), 1);
    }

    #[test]
    fn nunca_menor_que_uno() {
        let tmp = temp_dir("nr_min");
        let dir = write_index(&tmp, "idx", &[(0, "u0")]);
        let r = LocalInputs::new(&tmp);
        for has_map in [true, false] {
            for merge in [true, false] {
                for partitions in [0, 1, 3] {
                    for input in [unpartitioned(), vec![dir.as_str().into()], vec![]] {
                        let nr = nr_reduces(has_map, &input, partitions, merge, &r).unwrap();
                        assert!(nr >= 1);
                    }
                }
            }
        }
    }
}
